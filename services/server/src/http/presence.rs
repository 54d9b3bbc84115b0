// Presence read path: `GET /presence/:user_id`, the HTTP-observable form of
// C4's `who-is` op.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::warn;

use crate::presence;
use crate::state::AppState;

pub async fn who_is(State(state): State<AppState>, Path(user_id): Path<String>) -> Response {
    let mut redis = state.redis.clone();
    match presence::who_is(&mut redis, &user_id).await {
        Ok(Some(snapshot)) => Json(snapshot).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(user_id, error = %e, "presence lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

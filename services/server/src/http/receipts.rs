// Read path for C9 receipt state: `GET /messages/:id/receipts`.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use crate::error::IngressError;
use crate::repo::{self, receipts::RecipientState};
use crate::state::AppState;

pub async fn receipts_for_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<Json<Vec<RecipientState>>, IngressError> {
    let rows = repo::receipts::states_for_message(&state.pool, message_id).await?;
    Ok(Json(rows))
}

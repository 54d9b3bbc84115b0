use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthBody { status: "ok" })
}

#[derive(Serialize)]
struct DatabaseHealthBody {
    status: &'static str,
    database: &'static str,
}

/// Composite status check: a real round-trip against Postgres, not just a
/// process-is-alive signal.
pub async fn database_health(State(state): State<AppState>) -> impl IntoResponse {
    match sqlx::query("SELECT 1").execute(&state.pool).await {
        Ok(_) => (
            StatusCode::OK,
            Json(DatabaseHealthBody {
                status: "ok",
                database: "reachable",
            }),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(DatabaseHealthBody {
                status: "degraded",
                database: "unreachable",
            }),
        ),
    }
}

pub mod consumer;
pub mod db;
pub mod error;
pub mod fanout;
pub mod http;
pub mod idempotency;
pub mod presence;
pub mod ratelimit;
pub mod receipts;
pub mod redis_client;
pub mod repo;
pub mod replay;
pub mod state;
pub mod stream;
pub mod ws_common;
pub mod ws_socket;

pub use state::AppState;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/messages", axum::routing::post(http::submit::submit))
        .route(
            "/messages/:id",
            get(http::history::get_message).delete(http::history::delete_message),
        )
        .route(
            "/messages/:id/receipts",
            get(http::receipts::receipts_for_message),
        )
        .route(
            "/conversations/:id/messages",
            get(http::history::history),
        )
        .route("/presence/:user_id", get(http::presence::who_is))
        .route("/ws", get(ws_socket::ws_handler))
        .route("/health", get(http::health::health))
        .route("/health/database", get(http::health::database_health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

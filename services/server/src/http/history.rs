// History read path: `GET /conversations/:id/messages?before=&limit=`, served
// straight from Postgres. This is the fallback a client uses once a replay
// cursor (C6) reports `window_exceeded`.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chat_protocol::Envelope;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::IngressError;
use crate::replay;
use crate::repo::{self, MessageRow};
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 200;

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    before: Option<DateTime<Utc>>,
    limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct HistoryMessage {
    pub message_id: Uuid,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: String,
    pub reply_to_id: Option<Uuid>,
    pub thread_id: Option<String>,
    pub attachment_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub correlation_id: Uuid,
    pub state: String,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl From<MessageRow> for HistoryMessage {
    fn from(row: MessageRow) -> Self {
        Self {
            message_id: row.message_id,
            conversation_id: row.conversation_id,
            sender_id: row.sender_id,
            content: row.content,
            content_type: row.content_type,
            reply_to_id: row.reply_to_id,
            thread_id: row.thread_id,
            attachment_ids: row.attachment_ids,
            created_at: row.created_at,
            correlation_id: row.correlation_id,
            state: row.state,
            deleted_at: row.deleted_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HistoryPage {
    pub messages: Vec<HistoryMessage>,
}

fn history_message_from_envelope(envelope: Envelope) -> HistoryMessage {
    HistoryMessage {
        message_id: envelope.message_id,
        conversation_id: envelope.conversation_id,
        sender_id: envelope.sender_id,
        content: envelope.content,
        content_type: repo::messages::content_type_str(envelope.content_type).to_owned(),
        reply_to_id: envelope.metadata.reply_to_id,
        thread_id: envelope.metadata.thread_id,
        attachment_ids: envelope.metadata.attachment_ids,
        created_at: envelope.accepted_at,
        correlation_id: envelope.correlation_id,
        state: repo::messages::state_str(envelope.state).to_owned(),
        deleted_at: None,
    }
}

/// `GET /messages/:id` — tries C6's replay cache first (no deserializing a
/// whole conversation window just to read one message), falling back to the
/// database on a cache miss.
pub async fn get_message(State(state): State<AppState>, Path(message_id): Path<Uuid>) -> Response {
    let mut redis = state.redis.clone();
    if let Ok(Some(envelope)) = replay::fetch(&mut redis, message_id).await {
        return Json(history_message_from_envelope(envelope)).into_response();
    }
    match repo::messages::fetch_by_id(&state.pool, message_id).await {
        Ok(Some(row)) => Json(HistoryMessage::from(row)).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            warn!(error = %e, "message lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn history(
    State(state): State<AppState>,
    Path(conversation_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryPage>, IngressError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let rows = repo::messages::fetch_page(&state.pool, &conversation_id, query.before, limit).await?;
    Ok(Json(HistoryPage {
        messages: rows.into_iter().map(HistoryMessage::from).collect(),
    }))
}

/// `DELETE /messages/:id` — the only mutation this spec allows after
/// insert (§9 Open Question (b): soft-delete only, no content replacement).
pub async fn delete_message(
    State(state): State<AppState>,
    Path(message_id): Path<Uuid>,
) -> Result<StatusCode, IngressError> {
    let deleted = repo::messages::soft_delete(&state.pool, message_id).await?;
    Ok(if deleted {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    })
}

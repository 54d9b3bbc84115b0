use chat_protocol::{ContentType, MessageMetadata, MessageState};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::MessageRow;

pub(crate) fn content_type_str(ct: ContentType) -> &'static str {
    match ct {
        ContentType::Text => "text",
        ContentType::Image => "image",
        ContentType::File => "file",
        ContentType::Audio => "audio",
        ContentType::Video => "video",
        ContentType::Location => "location",
    }
}

pub(crate) fn state_str(state: MessageState) -> &'static str {
    match state {
        MessageState::Pending => "pending",
        MessageState::Persisted => "persisted",
        MessageState::Delivered => "delivered",
        MessageState::Read => "read",
        MessageState::Failed => "failed",
    }
}

fn state_rank_sql() -> &'static str {
    "CASE state
        WHEN 'pending' THEN 0
        WHEN 'persisted' THEN 1
        WHEN 'delivered' THEN 2
        WHEN 'read' THEN 3
        WHEN 'failed' THEN 255
        ELSE -1
     END"
}

/// Insert-or-ignore on `message_id`: a reprocessed envelope from a redelivered
/// stream entry is a no-op here, which is what gives C3 its idempotence.
/// Returns `true` if this call performed the insert.
#[allow(clippy::too_many_arguments)]
pub async fn insert_message(
    pool: &PgPool,
    message_id: Uuid,
    conversation_id: &str,
    sender_id: &str,
    content: &str,
    content_type: ContentType,
    metadata: &MessageMetadata,
    idempotency_key: &str,
    correlation_id: Uuid,
    accepted_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query!(
        r#"INSERT INTO messages
               (message_id, conversation_id, sender_id, content, content_type,
                reply_to_id, thread_id, attachment_ids, created_at,
                idempotency_key, correlation_id, state)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 'persisted')
           ON CONFLICT (message_id) DO NOTHING"#,
        message_id,
        conversation_id,
        sender_id,
        content,
        content_type_str(content_type),
        metadata.reply_to_id,
        metadata.thread_id,
        &metadata.attachment_ids,
        accepted_at,
        idempotency_key,
        correlation_id,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Advances `state` only if it ranks higher than the message's current
/// state, enforcing the monotonicity invariant (P4) at the database layer
/// rather than trusting callers to check first.
pub async fn advance_state(
    pool: &PgPool,
    message_id: Uuid,
    new_state: MessageState,
) -> Result<(), sqlx::Error> {
    let query = format!(
        "UPDATE messages SET state = $2 WHERE message_id = $1 AND {} < $3",
        state_rank_sql()
    );
    sqlx::query(&query)
        .bind(message_id)
        .bind(state_str(new_state))
        .bind(i32::from(new_state.rank()))
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn soft_delete(pool: &PgPool, message_id: Uuid) -> Result<bool, sqlx::Error> {
    let result = sqlx::query!(
        "UPDATE messages SET deleted_at = now() WHERE message_id = $1 AND deleted_at IS NULL",
        message_id
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn fetch_by_id(pool: &PgPool, message_id: Uuid) -> Result<Option<MessageRow>, sqlx::Error> {
    let row = sqlx::query_as!(
        MessageRow,
        r#"SELECT message_id, conversation_id, sender_id, content, content_type,
                  reply_to_id, thread_id, attachment_ids, created_at,
                  idempotency_key, correlation_id, state, deleted_at
           FROM messages WHERE message_id = $1"#,
        message_id
    )
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

/// History page, ordered newest-first, for `GET /conversations/:id/messages`.
pub async fn fetch_page(
    pool: &PgPool,
    conversation_id: &str,
    before: Option<DateTime<Utc>>,
    limit: i64,
) -> Result<Vec<MessageRow>, sqlx::Error> {
    let rows = sqlx::query_as!(
        MessageRow,
        r#"SELECT message_id, conversation_id, sender_id, content, content_type,
                  reply_to_id, thread_id, attachment_ids, created_at,
                  idempotency_key, correlation_id, state, deleted_at
           FROM messages
           WHERE conversation_id = $1
             AND ($2::timestamptz IS NULL OR created_at < $2)
           ORDER BY created_at DESC
           LIMIT $3"#,
        conversation_id,
        before,
        limit,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

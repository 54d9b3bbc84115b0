use chat_protocol::ReceiptState;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

fn state_str(state: ReceiptState) -> &'static str {
    match state {
        ReceiptState::Delivered => "delivered",
        ReceiptState::Read => "read",
    }
}

/// Insert-or-ignore on `(message_id, recipient_id, state)`: a state is
/// recorded at most once, so a reprocessed ack is a no-op. Returns `true`
/// if this call performed the insert.
pub async fn insert_receipt(
    pool: &PgPool,
    message_id: Uuid,
    recipient_id: &str,
    state: ReceiptState,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query!(
        r#"INSERT INTO receipts (message_id, recipient_id, state, at)
           VALUES ($1, $2, $3, now())
           ON CONFLICT (message_id, recipient_id, state) DO NOTHING"#,
        message_id,
        recipient_id,
        state_str(state),
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

#[derive(Debug, Serialize)]
pub struct RecipientState {
    pub recipient_id: String,
    pub state: String,
}

/// Every recorded state per recipient, used to compute the aggregate
/// message state as the minimum over recipients (§4.9).
pub async fn states_for_message(
    pool: &PgPool,
    message_id: Uuid,
) -> Result<Vec<RecipientState>, sqlx::Error> {
    let rows = sqlx::query_as!(
        RecipientState,
        r#"SELECT recipient_id, state FROM receipts WHERE message_id = $1"#,
        message_id
    )
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

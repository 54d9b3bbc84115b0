// C9: delivery receipt tracker. Records per-recipient {delivered, read}
// receipts idempotently and drives the message's own lifecycle state
// forward: persisted -> delivered on the first recipient ack, delivered ->
// read on the first read ack. Each newly-recorded receipt is published to
// the sender's subject so their clients observe progression live.

use chat_protocol::{MessageState, ReceiptState};
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use uuid::Uuid;

use crate::fanout::{self, FanoutEvent};
use crate::repo;

pub async fn record(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    message_id: Uuid,
    recipient_id: &str,
    state: ReceiptState,
    sender_id: &str,
) -> Result<(), sqlx::Error> {
    let inserted = repo::receipts::insert_receipt(pool, message_id, recipient_id, state).await?;
    if !inserted {
        return Ok(());
    }

    let message_state = match state {
        ReceiptState::Delivered => MessageState::Delivered,
        ReceiptState::Read => MessageState::Read,
    };
    repo::messages::advance_state(pool, message_id, message_state).await?;

    let event = FanoutEvent::ReceiptUpdate {
        message_id,
        recipient_id: recipient_id.to_owned(),
        state,
    };
    let subject = fanout::user_subject(sender_id);
    // Best-effort: a missed receipt-update event is recovered by the sender's
    // own reconnect/history read, it is never re-delivered here.
    let _ = fanout::publish(redis, &subject, &event).await;
    Ok(())
}

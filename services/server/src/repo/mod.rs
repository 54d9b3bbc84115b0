pub mod conversations;
pub mod messages;
pub mod receipts;

pub struct MessageRow {
    pub message_id: uuid::Uuid,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: String,
    pub reply_to_id: Option<uuid::Uuid>,
    pub thread_id: Option<String>,
    pub attachment_ids: Vec<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub idempotency_key: String,
    pub correlation_id: uuid::Uuid,
    pub state: String,
    pub deleted_at: Option<chrono::DateTime<chrono::Utc>>,
}

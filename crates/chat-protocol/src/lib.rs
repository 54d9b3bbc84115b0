// chat-protocol: wire types shared by the ingress HTTP API, the socket
// protocol, and the internal envelope that flows through the stream,
// consumer pool, and replay cache.
//
// HTTP bodies and WebSocket frames both use a top-level discriminated tag
// (`kind` for socket frames) for deserialization, matching the JSON shape
// clients are expected to parse.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Shared sub-types
// ---------------------------------------------------------------------------

/// The kind of payload carried by a message's `content` bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    File,
    Audio,
    Video,
    Location,
}

/// Lifecycle state of a message envelope. Ordered: a message may only move
/// forward through this list, never backward (see `rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageState {
    Pending,
    Persisted,
    Delivered,
    Read,
    Failed,
}

impl MessageState {
    /// Rank used to enforce monotonic state transitions. `Failed` is
    /// terminal and incomparable to the success states, so callers special
    /// case it rather than relying on its rank for ordering.
    pub fn rank(self) -> u8 {
        match self {
            MessageState::Pending => 0,
            MessageState::Persisted => 1,
            MessageState::Delivered => 2,
            MessageState::Read => 3,
            MessageState::Failed => 255,
        }
    }
}

/// Per-recipient delivery receipt state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptState {
    Delivered,
    Read,
}

/// Optional metadata carried alongside a message's primary content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Ingress HTTP API
// ---------------------------------------------------------------------------

/// Request body for `POST /messages`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitRequest {
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub client_message_id: Option<String>,
    #[serde(default)]
    pub recipient_ids: Vec<String>,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Response body for a successful `POST /messages` (HTTP 202).
#[derive(Debug, Clone, Serialize)]
pub struct SubmitAck {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub state: MessageState,
    pub accepted_at: chrono::DateTime<chrono::Utc>,
    pub idempotency_key: String,
    /// Set when this response was served from the idempotency store rather
    /// than freshly assigned.
    pub idempotent_hit: bool,
}

/// Frozen v1 ingress/ws error codes.
pub mod error_codes {
    pub const INVALID_SCHEMA: &str = "INVALID_SCHEMA";
    pub const MISSING_REQUIRED_FIELD: &str = "MISSING_REQUIRED_FIELD";
    pub const INVALID_FIELD_TYPE: &str = "INVALID_FIELD_TYPE";
    pub const FIELD_TOO_LONG: &str = "FIELD_TOO_LONG";
    pub const INVALID_RECIPIENT: &str = "INVALID_RECIPIENT";
    pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";
    pub const CONVERSATION_NOT_FOUND: &str = "CONVERSATION_NOT_FOUND";
    pub const NOT_CONVERSATION_MEMBER: &str = "NOT_CONVERSATION_MEMBER";
    pub const CONVERSATION_INACTIVE: &str = "CONVERSATION_INACTIVE";
    pub const USER_BLOCKED: &str = "USER_BLOCKED";
    pub const ENQUEUE_FAILED: &str = "ENQUEUE_FAILED";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const PROTOCOL_ERROR: &str = "PROTOCOL_ERROR";
    pub const SLOW_CONSUMER: &str = "SLOW_CONSUMER";
}

/// Frozen HTTP error envelope used by all non-2xx responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Internal envelope (C2 - C8)
// ---------------------------------------------------------------------------

/// The unit of work flowing through the stream, consumer pool, bus, and
/// replay cache. Constructed once at ingress; fields are never mutated
/// after creation except `state`, which only advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: Uuid,
    pub conversation_id: String,
    pub sender_id: String,
    pub content: String,
    pub content_type: ContentType,
    #[serde(default)]
    pub metadata: MessageMetadata,
    #[serde(default)]
    pub recipient_ids: Vec<String>,
    pub client_message_id: Option<String>,
    pub idempotency_key: String,
    pub correlation_id: Uuid,
    pub accepted_at: chrono::DateTime<chrono::Utc>,
    pub state: MessageState,
}

// ---------------------------------------------------------------------------
// Socket protocol (bidirectional, framed)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinFrame {
    pub conversation_id: String,
    pub user_id: String,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveFrame {
    pub conversation_id: String,
    pub user_id: String,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSendFrame {
    pub conversation_id: String,
    pub user_id: String,
    pub content: String,
    #[serde(default)]
    pub content_type: Option<ContentType>,
    #[serde(default)]
    pub client_message_id: Option<String>,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageReceiveFrame {
    pub conversation_id: String,
    pub message_id: Uuid,
    pub sender: String,
    pub content: String,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageAckFrame {
    pub message_id: Uuid,
}

/// Client's explicit acknowledgement of a `message.receive` frame, carrying
/// the recipient's own progression of that message to `delivered` or `read`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptFrame {
    pub message_id: Uuid,
    pub state: ReceiptState,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinAckFrame {
    pub joined: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaveAckFrame {
    pub left: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypingFrame {
    pub conversation_id: String,
    pub user_id: String,
    pub typing: bool,
    pub ts: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartbeatFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayRequestFrame {
    pub conversation_id: String,
    #[serde(default)]
    pub after_message_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayResponseFrame {
    pub conversation_id: String,
    pub envelopes: Vec<Envelope>,
    /// True when the requested cursor had already fallen out of the replay
    /// window; the client should fall back to `GET /conversations/:id/messages`.
    pub window_exceeded: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceFrame {
    pub user_id: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorFrame {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// All WebSocket frame kinds, tagged on `kind` for discriminated
/// deserialization (e.g. `{"kind": "join", ...}`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WsMessage {
    Join(JoinFrame),
    JoinAck(JoinAckFrame),
    Leave(LeaveFrame),
    LeaveAck(LeaveAckFrame),
    MessageSend(MessageSendFrame),
    MessageAck(MessageAckFrame),
    MessageReceive(MessageReceiveFrame),
    Receipt(ReceiptFrame),
    Typing(TypingFrame),
    Heartbeat(HeartbeatFrame),
    Replay(ReplayRequestFrame),
    ReplayResponse(ReplayResponseFrame),
    Presence(PresenceFrame),
    Error(ErrorFrame),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_message_join_round_trips_through_json() {
        let msg = WsMessage::Join(JoinFrame {
            conversation_id: "conv-1".to_owned(),
            user_id: "u1".to_owned(),
            ts: chrono::Utc::now(),
        });
        let json = serde_json::to_string(&msg).expect("serialize");
        assert!(json.contains("\"kind\":\"join\""));
        let back: WsMessage = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, msg);
    }

    #[test]
    fn message_state_rank_is_monotonic_for_success_states() {
        assert!(MessageState::Pending.rank() < MessageState::Persisted.rank());
        assert!(MessageState::Persisted.rank() < MessageState::Delivered.rank());
        assert!(MessageState::Delivered.rank() < MessageState::Read.rank());
    }

    #[test]
    fn submit_request_deserializes_with_defaults() {
        let json = r#"{
            "conversation_id": "c1",
            "sender_id": "u1",
            "content": "hi",
            "content_type": "text"
        }"#;
        let req: SubmitRequest = serde_json::from_str(json).expect("deserialize");
        assert_eq!(req.client_message_id, None);
        assert!(req.recipient_ids.is_empty());
        assert_eq!(req.metadata, MessageMetadata::default());
    }

    #[test]
    fn content_type_serializes_snake_case() {
        let json = serde_json::to_string(&ContentType::Text).unwrap();
        assert_eq!(json, "\"text\"");
    }
}

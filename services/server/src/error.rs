use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chat_protocol::HttpErrorEnvelope;

/// Typed ingress-layer error taxonomy. Every variant maps to exactly one
/// frozen error code from `chat_protocol::error_codes` and one HTTP status,
/// so the mapping can't drift between handlers.
#[derive(Debug, thiserror::Error)]
pub enum IngressError {
    #[error("invalid schema: {0}")]
    InvalidSchema(String),
    #[error("missing required field: {0}")]
    MissingRequiredField(&'static str),
    #[error("invalid field type: {0}")]
    InvalidFieldType(&'static str),
    #[error("field too long: {0}")]
    FieldTooLong(&'static str),
    #[error("invalid recipient: {0}")]
    InvalidRecipient(String),
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimitExceeded { retry_after_secs: u64 },
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),
    #[error("not a conversation member: {0}")]
    NotConversationMember(String),
    #[error("conversation inactive: {0}")]
    ConversationInactive(String),
    #[error("user blocked: {0}")]
    UserBlocked(String),
    #[error("failed to enqueue envelope")]
    EnqueueFailed,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store error: {0}")]
    Store(#[from] redis::RedisError),
}

impl IngressError {
    pub fn code(&self) -> &'static str {
        use chat_protocol::error_codes as ec;
        match self {
            IngressError::InvalidSchema(_) => ec::INVALID_SCHEMA,
            IngressError::MissingRequiredField(_) => ec::MISSING_REQUIRED_FIELD,
            IngressError::InvalidFieldType(_) => ec::INVALID_FIELD_TYPE,
            IngressError::FieldTooLong(_) => ec::FIELD_TOO_LONG,
            IngressError::InvalidRecipient(_) => ec::INVALID_RECIPIENT,
            IngressError::RateLimitExceeded { .. } => ec::RATE_LIMIT_EXCEEDED,
            IngressError::ConversationNotFound(_) => ec::CONVERSATION_NOT_FOUND,
            IngressError::NotConversationMember(_) => ec::NOT_CONVERSATION_MEMBER,
            IngressError::ConversationInactive(_) => ec::CONVERSATION_INACTIVE,
            IngressError::UserBlocked(_) => ec::USER_BLOCKED,
            IngressError::EnqueueFailed => ec::ENQUEUE_FAILED,
            IngressError::Database(_) | IngressError::Store(_) => ec::INTERNAL_ERROR,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            IngressError::InvalidSchema(_)
            | IngressError::MissingRequiredField(_)
            | IngressError::InvalidFieldType(_)
            | IngressError::FieldTooLong(_)
            | IngressError::InvalidRecipient(_) => StatusCode::BAD_REQUEST,
            IngressError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            IngressError::ConversationNotFound(_) => StatusCode::NOT_FOUND,
            IngressError::NotConversationMember(_) | IngressError::UserBlocked(_) => {
                StatusCode::FORBIDDEN
            }
            IngressError::ConversationInactive(_) => StatusCode::CONFLICT,
            IngressError::EnqueueFailed
            | IngressError::Database(_)
            | IngressError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for IngressError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = match &self {
            IngressError::RateLimitExceeded { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let envelope = HttpErrorEnvelope {
            code: self.code().to_owned(),
            message: self.to_string(),
            details: retry_after
                .map(|secs| serde_json::json!({ "retry_after_secs": secs })),
        };
        (status, Json(envelope)).into_response()
    }
}

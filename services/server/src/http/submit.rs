// C7: ingress validator. `POST /messages` -- schema validation, rate limit,
// membership checks, idempotent assignment, then stream append, in the
// order spec'd in §4.1. This is the only HTTP handler that touches C1/C2.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chat_protocol::{Envelope, MessageState, SubmitAck, SubmitRequest};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::IngressError;
use crate::idempotency::{self, GetOrSet, IdempotencyRecord};
use crate::ratelimit;
use crate::repo;
use crate::state::AppState;
use crate::stream;

const MAX_CLIENT_MESSAGE_ID_LEN: usize = 255;
const MAX_RECIPIENTS: usize = 1_000;

fn validate(req: &SubmitRequest, max_content_len: usize) -> Result<(), IngressError> {
    if req.conversation_id.trim().is_empty() {
        return Err(IngressError::MissingRequiredField("conversation_id"));
    }
    if req.sender_id.trim().is_empty() {
        return Err(IngressError::MissingRequiredField("sender_id"));
    }
    if req.content.is_empty() {
        return Err(IngressError::MissingRequiredField("content"));
    }
    if req.content.len() > max_content_len {
        return Err(IngressError::FieldTooLong("content"));
    }
    if let Some(cmid) = &req.client_message_id {
        if cmid.len() > MAX_CLIENT_MESSAGE_ID_LEN {
            return Err(IngressError::FieldTooLong("client_message_id"));
        }
    }
    if req.recipient_ids.len() > MAX_RECIPIENTS {
        return Err(IngressError::InvalidRecipient(
            "too many recipients".to_owned(),
        ));
    }
    if req.recipient_ids.iter().any(|r| r.trim().is_empty()) {
        return Err(IngressError::InvalidRecipient(
            "recipient id must not be empty".to_owned(),
        ));
    }
    Ok(())
}

pub async fn submit(
    State(state): State<AppState>,
    Json(req): Json<SubmitRequest>,
) -> Result<(StatusCode, Json<SubmitAck>), IngressError> {
    let ack = accept(&state, req).await?;
    Ok((StatusCode::ACCEPTED, Json(ack)))
}

/// The validator sequence from §4.1, shared by the HTTP handler and the
/// socket session's `message.send` handling (C8 forwards straight to C7).
pub async fn accept(state: &AppState, req: SubmitRequest) -> Result<SubmitAck, IngressError> {
    validate(&req, state.config.max_content_len)?;

    let mut redis = state.redis.clone();

    let rate = ratelimit::check(
        &mut redis,
        &req.sender_id,
        state.config.rate_limit_window_secs,
        state.config.rate_limit_max,
    )
    .await?;
    if let Err(limited) = rate {
        return Err(IngressError::RateLimitExceeded {
            retry_after_secs: limited.retry_after_secs,
        });
    }

    let membership =
        repo::conversations::check_membership(&state.pool, &req.conversation_id, &req.sender_id)
            .await?;
    if !membership.exists {
        return Err(IngressError::ConversationNotFound(req.conversation_id.clone()));
    }
    if !membership.is_member {
        return Err(IngressError::NotConversationMember(req.sender_id.clone()));
    }
    if membership.blocked {
        return Err(IngressError::UserBlocked(req.sender_id.clone()));
    }
    if !membership.active {
        return Err(IngressError::ConversationInactive(req.conversation_id.clone()));
    }

    let idempotency_key = match &req.client_message_id {
        Some(cmid) => idempotency::derive_key(&req.sender_id, cmid),
        None => Uuid::new_v4().to_string(),
    };

    let candidate = IdempotencyRecord {
        message_id: Uuid::new_v4(),
        correlation_id: Uuid::new_v4(),
        accepted_at: chrono::Utc::now(),
    };
    let outcome = idempotency::get_or_set(
        &mut redis,
        &idempotency_key,
        candidate,
        state.config.idempotency_ttl_secs,
    )
    .await?;
    let record = outcome.record().clone();

    let recipient_ids = if req.recipient_ids.is_empty() {
        repo::conversations::member_ids(&state.pool, &req.conversation_id, &req.sender_id)
            .await
            .unwrap_or_default()
    } else {
        req.recipient_ids.clone()
    };

    let envelope = Envelope {
        message_id: record.message_id,
        conversation_id: req.conversation_id.clone(),
        sender_id: req.sender_id.clone(),
        content: req.content.clone(),
        content_type: req.content_type,
        metadata: req.metadata.clone(),
        recipient_ids,
        client_message_id: req.client_message_id.clone(),
        idempotency_key: idempotency_key.clone(),
        correlation_id: record.correlation_id,
        accepted_at: record.accepted_at,
        state: MessageState::Pending,
    };

    match outcome {
        GetOrSet::Created(_) => {
            append_or_fail(state, &mut redis, &envelope).await?;
        }
        GetOrSet::Existing(_) => {
            // Design note (§9, "Idempotency + enqueue atomicity"): a prior
            // call may have written the C1 record but crashed before the C2
            // append. If the message was never persisted, re-append rather
            // than assume it is already in flight.
            let already_persisted =
                repo::messages::fetch_by_id(&state.pool, record.message_id)
                    .await
                    .ok()
                    .flatten()
                    .is_some();
            if !already_persisted {
                if let Err(e) = append_or_fail(state, &mut redis, &envelope).await {
                    warn!(message_id = %record.message_id, error = %e, "re-append on idempotent retry failed, caller may retry again");
                }
            }
        }
    }

    info!(
        message_id = %envelope.message_id,
        conversation_id = %envelope.conversation_id,
        idempotent_hit = !outcome_created(&outcome),
        "message accepted"
    );

    let ack = SubmitAck {
        message_id: envelope.message_id,
        correlation_id: envelope.correlation_id,
        state: MessageState::Pending,
        accepted_at: envelope.accepted_at,
        idempotency_key,
        idempotent_hit: !outcome_created(&outcome),
    };
    Ok(ack)
}

fn outcome_created(outcome: &GetOrSet) -> bool {
    outcome.created()
}

async fn append_or_fail(
    state: &AppState,
    redis: &mut redis::aio::ConnectionManager,
    envelope: &Envelope,
) -> Result<(), IngressError> {
    let partition = stream::partition_for(&envelope.conversation_id, state.config.partition_count);
    stream::append(redis, partition, envelope)
        .await
        .map_err(|_| IngressError::EnqueueFailed)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_protocol::{ContentType, MessageMetadata};

    fn base_req() -> SubmitRequest {
        SubmitRequest {
            conversation_id: "c1".to_owned(),
            sender_id: "u1".to_owned(),
            content: "hello".to_owned(),
            content_type: ContentType::Text,
            client_message_id: None,
            recipient_ids: vec![],
            metadata: MessageMetadata::default(),
        }
    }

    #[test]
    fn validate_rejects_empty_conversation_id() {
        let mut req = base_req();
        req.conversation_id = String::new();
        assert!(validate(&req, 10_000).is_err());
    }

    #[test]
    fn validate_rejects_oversized_content() {
        let mut req = base_req();
        req.content = "a".repeat(20_000);
        assert!(validate(&req, 10_000).is_err());
    }

    #[test]
    fn validate_rejects_empty_recipient_entries() {
        let mut req = base_req();
        req.recipient_ids = vec!["".to_owned()];
        assert!(validate(&req, 10_000).is_err());
    }

    #[test]
    fn validate_accepts_well_formed_request() {
        assert!(validate(&base_req(), 10_000).is_ok());
    }
}

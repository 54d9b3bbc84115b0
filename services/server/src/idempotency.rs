// C1: keyed idempotency store. Maps (sender, client-message-id) -> assigned
// message id via an atomic compare-and-set against Redis, so a retried
// submission from any instance in the fleet observes the same winner.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

fn key(idempotency_key: &str) -> String {
    format!("chat:idem:{idempotency_key}")
}

/// Derives the idempotency key from (sender-id, client-message-id) per
/// spec §4.1 step 4. Callers without a client-message-id should synthesize
/// a fresh key instead of calling this (see `http::submit`).
pub fn derive_key(sender_id: &str, client_message_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender_id.as_bytes());
    hasher.update(b"\0");
    hasher.update(client_message_id.as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub message_id: Uuid,
    pub correlation_id: Uuid,
    pub accepted_at: DateTime<Utc>,
}

/// Result of `get_or_set`: `Created` means this call's candidate record won
/// and was just written; `Existing` means a prior call already assigned one.
#[derive(Debug, Clone)]
pub enum GetOrSet {
    Created(IdempotencyRecord),
    Existing(IdempotencyRecord),
}

impl GetOrSet {
    pub fn record(&self) -> &IdempotencyRecord {
        match self {
            GetOrSet::Created(r) | GetOrSet::Existing(r) => r,
        }
    }

    pub fn created(&self) -> bool {
        matches!(self, GetOrSet::Created(_))
    }
}

/// Atomic compare-and-set: writes `candidate` under `idempotency_key` only if
/// absent, bounded by `ttl_secs`. Concurrent callers with the same key race
/// on the underlying `SET ... NX`; exactly one wins and all observe its record.
pub async fn get_or_set(
    redis: &mut ConnectionManager,
    idempotency_key: &str,
    candidate: IdempotencyRecord,
    ttl_secs: u64,
) -> redis::RedisResult<GetOrSet> {
    let redis_key = key(idempotency_key);
    let payload = serde_json::to_string(&candidate).expect("IdempotencyRecord is serializable");

    let set: Option<String> = redis::cmd("SET")
        .arg(&redis_key)
        .arg(&payload)
        .arg("NX")
        .arg("EX")
        .arg(ttl_secs)
        .query_async(redis)
        .await?;

    if set.is_some() {
        return Ok(GetOrSet::Created(candidate));
    }

    let existing: String = redis.get(&redis_key).await?;
    let record: IdempotencyRecord =
        serde_json::from_str(&existing).unwrap_or(candidate);
    Ok(GetOrSet::Existing(record))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic_and_sender_scoped() {
        let a = derive_key("u1", "k1");
        let b = derive_key("u1", "k1");
        let c = derive_key("u2", "k1");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn derive_key_does_not_collide_across_the_separator() {
        // "u1\0k1" and "u" + "1k1" must not hash the same.
        let a = derive_key("u1", "k1");
        let b = derive_key("u", "1k1");
        assert_ne!(a, b);
    }
}

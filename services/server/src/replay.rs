// C6: replay cache. A per-conversation Redis sorted set orders message ids
// by accepted-at score; a parallel string key per message id holds the
// envelope payload so lookups by id don't require deserializing the whole
// window. Both are capped by the shorter of a TTL and a per-conversation
// count, refreshed on every write -- the cache never claims completeness,
// it only accelerates reconnect replay within its window.

use chat_protocol::Envelope;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

fn zset_key(conversation_id: &str) -> String {
    format!("chat:replay:conv:{conversation_id}")
}

fn msg_key(message_id: &str) -> String {
    format!("chat:replay:msg:{message_id}")
}

/// Writes `envelope` into its conversation's window. Idempotent: storing the
/// same message id again just refreshes its score and TTL.
pub async fn store(
    redis: &mut ConnectionManager,
    envelope: &Envelope,
    ttl_secs: u64,
    max_per_conversation: u64,
) -> redis::RedisResult<()> {
    let zkey = zset_key(&envelope.conversation_id);
    let mkey = msg_key(&envelope.message_id.to_string());
    let score = envelope.accepted_at.timestamp_millis();
    let payload = serde_json::to_string(envelope).expect("Envelope is serializable");

    redis
        .zadd::<_, _, _, ()>(&zkey, envelope.message_id.to_string(), score)
        .await?;
    redis.expire::<_, ()>(&zkey, ttl_secs as i64).await?;
    redis.set_ex::<_, _, ()>(&mkey, payload, ttl_secs).await?;

    let count: u64 = redis.zcard(&zkey).await?;
    if count > max_per_conversation {
        let overflow = count - max_per_conversation;
        redis
            .zremrangebyrank::<_, ()>(&zkey, 0, overflow as isize - 1)
            .await?;
    }
    Ok(())
}

/// Result of `fetch_since`: either the ordered tail since `after`, or a
/// signal that the cursor has aged out of the window and the caller should
/// fall back to database pagination.
pub enum FetchSince {
    Envelopes(Vec<Envelope>),
    WindowExceeded,
}

pub async fn fetch_since(
    redis: &mut ConnectionManager,
    conversation_id: &str,
    after_message_id: Option<uuid::Uuid>,
) -> redis::RedisResult<FetchSince> {
    let zkey = zset_key(conversation_id);

    let ids: Vec<String> = match after_message_id {
        None => redis.zrange(&zkey, 0, -1).await?,
        Some(after) => {
            let score: Option<f64> = redis.zscore(&zkey, after.to_string()).await?;
            let Some(score) = score else {
                return Ok(FetchSince::WindowExceeded);
            };
            redis
                .zrangebyscore(&zkey, format!("({score}"), "+inf")
                .await?
        }
    };

    let mut envelopes = Vec::with_capacity(ids.len());
    for id in ids {
        let raw: Option<String> = redis.get(msg_key(&id)).await?;
        if let Some(raw) = raw {
            if let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) {
                envelopes.push(envelope);
            }
        }
    }
    Ok(FetchSince::Envelopes(envelopes))
}

pub async fn fetch(
    redis: &mut ConnectionManager,
    message_id: uuid::Uuid,
) -> redis::RedisResult<Option<Envelope>> {
    let raw: Option<String> = redis.get(msg_key(&message_id.to_string())).await?;
    Ok(raw.and_then(|r| serde_json::from_str(&r).ok()))
}

// C4: fleet-wide presence registry. A Redis hash per user maps socket id to
// a JSON-encoded {instance_id, connected_at, last_seen} record; TTL on the
// hash key bounds how long a user can go unrefreshed before being treated
// as offline. Every write refreshes the hash's TTL so a live user's record
// never expires out from under their open sockets.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};

fn key(user_id: &str) -> String {
    format!("chat:presence:{user_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketRecord {
    pub instance_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// Registers `socket_id` for `user_id` on this instance, refreshing the TTL.
/// Returns `true` if the user had no other live sockets beforehand -- the
/// caller should publish `presence.online` exactly when this is `true`.
pub async fn register(
    redis: &mut ConnectionManager,
    user_id: &str,
    socket_id: &str,
    instance_id: &str,
    ttl_secs: u64,
) -> redis::RedisResult<bool> {
    let was_offline = !is_online(redis, user_id, ttl_secs).await?;
    let now = Utc::now();
    let record = SocketRecord {
        instance_id: instance_id.to_owned(),
        connected_at: now,
        last_seen: now,
    };
    let payload = serde_json::to_string(&record).expect("SocketRecord is serializable");
    let key = key(user_id);
    redis.hset::<_, _, _, ()>(&key, socket_id, payload).await?;
    redis.expire::<_, ()>(&key, ttl_secs as i64).await?;
    Ok(was_offline)
}

/// Refreshes the per-socket `last_seen` and the hash's overall TTL.
pub async fn heartbeat(
    redis: &mut ConnectionManager,
    user_id: &str,
    socket_id: &str,
    ttl_secs: u64,
) -> redis::RedisResult<()> {
    let key = key(user_id);
    let existing: Option<String> = redis.hget(&key, socket_id).await?;
    if let Some(raw) = existing {
        if let Ok(mut record) = serde_json::from_str::<SocketRecord>(&raw) {
            record.last_seen = Utc::now();
            let payload = serde_json::to_string(&record).expect("SocketRecord is serializable");
            redis.hset::<_, _, _, ()>(&key, socket_id, payload).await?;
        }
    }
    redis.expire::<_, ()>(&key, ttl_secs as i64).await?;
    Ok(())
}

/// Removes `socket_id` from `user_id`'s registry. Returns `true` if no
/// non-expired sockets remain -- the caller should publish `presence.offline`.
pub async fn unregister(
    redis: &mut ConnectionManager,
    user_id: &str,
    socket_id: &str,
) -> redis::RedisResult<bool> {
    let key = key(user_id);
    redis.hdel::<_, _, ()>(&key, socket_id).await?;
    let remaining: i64 = redis.hlen(&key).await?;
    if remaining == 0 {
        redis.del::<_, ()>(&key).await?;
        return Ok(true);
    }
    Ok(false)
}

pub async fn sockets_of(
    redis: &mut ConnectionManager,
    user_id: &str,
) -> redis::RedisResult<Vec<String>> {
    let key = key(user_id);
    let map: std::collections::HashMap<String, String> = redis.hgetall(&key).await?;
    Ok(map.into_keys().collect())
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub user_id: String,
    pub sockets: Vec<SocketRecord>,
}

/// `who-is(user) -> snapshot-or-null`: the full set of an online user's live
/// socket records, or `None` if the user has none.
pub async fn who_is(
    redis: &mut ConnectionManager,
    user_id: &str,
) -> redis::RedisResult<Option<PresenceSnapshot>> {
    let key = key(user_id);
    let map: std::collections::HashMap<String, String> = redis.hgetall(&key).await?;
    if map.is_empty() {
        return Ok(None);
    }
    let sockets = map
        .into_values()
        .filter_map(|raw| serde_json::from_str::<SocketRecord>(&raw).ok())
        .collect();
    Ok(Some(PresenceSnapshot {
        user_id: user_id.to_owned(),
        sockets,
    }))
}

/// `true` iff at least one socket record exists for `user_id`. The hash's
/// own TTL already handles expiry of an abandoned user wholesale, but
/// `ttl_secs` is accepted for symmetry with the spec's "non-expired" wording
/// and future per-socket expiry.
pub async fn is_online(
    redis: &mut ConnectionManager,
    user_id: &str,
    _ttl_secs: u64,
) -> redis::RedisResult<bool> {
    let key = key(user_id);
    let len: i64 = redis.hlen(&key).await?;
    Ok(len > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socket_record_round_trips_through_json() {
        let now = Utc::now();
        let record = SocketRecord {
            instance_id: "inst-1".to_owned(),
            connected_at: now,
            last_seen: now,
        };
        let json = serde_json::to_string(&record).unwrap();
        let back: SocketRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.instance_id, "inst-1");
    }
}

// Fixed-window rate limiter for ingress step 2 (§4.1), shared fleet-wide
// through the same Redis store as C1/C4/C5/C6 so a sender retried against a
// different instance is still throttled correctly.

use redis::AsyncCommands;
use redis::aio::ConnectionManager;

fn key(sender_id: &str, window_secs: u64) -> String {
    // Bucket by window start so counts don't straddle windows under
    // concurrent access; the window id is coarse enough to not need a
    // synchronized clock across instances.
    let window_id = chrono::Utc::now().timestamp() as u64 / window_secs;
    format!("chat:ratelimit:{sender_id}:{window_id}")
}

pub struct RateLimitExceeded {
    pub retry_after_secs: u64,
}

/// Increments the sender's window counter and fails the request once `max`
/// is exceeded within `window_secs`. Returns `Ok(())` on a permitted request.
pub async fn check(
    redis: &mut ConnectionManager,
    sender_id: &str,
    window_secs: u64,
    max: u64,
) -> redis::RedisResult<Result<(), RateLimitExceeded>> {
    let key = key(sender_id, window_secs);
    let count: u64 = redis.incr(&key, 1).await?;
    if count == 1 {
        redis.expire::<_, ()>(&key, window_secs as i64).await?;
    }
    if count > max {
        let ttl: i64 = redis.ttl(&key).await?;
        let retry_after_secs = ttl.max(0) as u64;
        return Ok(Err(RateLimitExceeded { retry_after_secs }));
    }
    Ok(Ok(()))
}

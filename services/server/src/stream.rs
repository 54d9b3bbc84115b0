// C2: partitioned durable stream. Backed by Redis Streams, one stream key
// per partition, with a shared consumer group per partition giving the
// ack / visibility-timeout / re-claim semantics spec'd in §4.2. Partition
// assignment is a stable hash of the conversation id mod N, so every
// message of one conversation lands in the same partition and therefore
// keeps strict FIFO order relative to its conversation-mates.

use chat_protocol::Envelope;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};

/// FNV-1a. Stable across process restarts and Rust versions, unlike
/// `std::hash`'s `DefaultHasher` (which is randomized per-process) -- this
/// hash must agree across every instance in the fleet.
fn stable_hash(bytes: &[u8]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = FNV_OFFSET;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub fn partition_for(conversation_id: &str, partition_count: u32) -> u32 {
    (stable_hash(conversation_id.as_bytes()) % u64::from(partition_count)) as u32
}

fn stream_key(partition: u32) -> String {
    format!("chat:stream:{partition}")
}

fn dead_letter_key() -> String {
    "chat:stream:dead".to_owned()
}

const FIELD: &str = "envelope";
const ATTEMPTS_FIELD: &str = "attempts";

/// An entry read off a partition, carrying its stream id for later ack/claim.
#[derive(Debug, Clone)]
pub struct StreamEntry {
    pub id: String,
    pub envelope: Envelope,
    pub attempts: u32,
}

pub async fn ensure_group(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
) -> redis::RedisResult<()> {
    let key = stream_key(partition);
    let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
        .arg("CREATE")
        .arg(&key)
        .arg(group)
        .arg("$")
        .arg("MKSTREAM")
        .query_async(redis)
        .await;
    match result {
        Ok(()) => Ok(()),
        // BUSYGROUP: the group already exists, which is the steady-state case.
        Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
        Err(e) => Err(e),
    }
}

/// Appends an envelope to its conversation's partition. Returns the
/// Redis-assigned stream id, which acts as the durable offset.
pub async fn append(
    redis: &mut ConnectionManager,
    partition: u32,
    envelope: &Envelope,
) -> redis::RedisResult<String> {
    let payload = serde_json::to_string(envelope).expect("Envelope is serializable");
    redis
        .xadd(stream_key(partition), "*", &[(FIELD, payload), (ATTEMPTS_FIELD, "0".to_owned())])
        .await
}

/// Reads up to `batch_max` pending entries for `consumer` in `group`,
/// blocking briefly if none are immediately available.
pub async fn read(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
    consumer: &str,
    batch_max: usize,
) -> redis::RedisResult<Vec<StreamEntry>> {
    let key = stream_key(partition);
    let opts = StreamReadOptions::default()
        .group(group, consumer)
        .count(batch_max);
    let reply: StreamReadReply = redis.xread_options(&[&key], &[">"], &opts).await?;
    Ok(parse_entries(reply))
}

fn parse_entries(reply: StreamReadReply) -> Vec<StreamEntry> {
    let mut out = Vec::new();
    for stream_key in reply.keys {
        for stream_id in stream_key.ids {
            let Some(raw) = stream_id.map.get(FIELD) else {
                continue;
            };
            let raw: String = match raw {
                redis::Value::BulkString(bytes) => {
                    String::from_utf8_lossy(bytes).into_owned()
                }
                redis::Value::SimpleString(s) => s.clone(),
                _ => continue,
            };
            let Ok(envelope) = serde_json::from_str::<Envelope>(&raw) else {
                continue;
            };
            let attempts = stream_id
                .map
                .get(ATTEMPTS_FIELD)
                .and_then(|v| match v {
                    redis::Value::BulkString(bytes) => {
                        String::from_utf8_lossy(bytes).parse::<u32>().ok()
                    }
                    redis::Value::SimpleString(s) => s.parse::<u32>().ok(),
                    _ => None,
                })
                .unwrap_or(0);
            out.push(StreamEntry {
                id: stream_id.id,
                envelope,
                attempts,
            });
        }
    }
    out
}

pub async fn ack(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
    id: &str,
) -> redis::RedisResult<()> {
    let _: i64 = redis.xack(stream_key(partition), group, &[id]).await?;
    Ok(())
}

/// Reclaims entries idle for longer than `min_idle_ms`, handing them back to
/// `consumer`. Used by a recovering worker to pick up another's abandoned
/// in-flight entries once the visibility timeout has elapsed.
pub async fn claim_stale(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
    consumer: &str,
    min_idle_ms: u64,
    count: usize,
) -> redis::RedisResult<Vec<StreamEntry>> {
    let key = stream_key(partition);
    let reply: (String, StreamReadReply, Vec<String>) = redis::cmd("XAUTOCLAIM")
        .arg(&key)
        .arg(group)
        .arg(consumer)
        .arg(min_idle_ms)
        .arg("0-0")
        .arg("COUNT")
        .arg(count)
        .query_async(redis)
        .await?;
    Ok(parse_entries(reply.1))
}

/// Re-enqueues `entry` with its attempt counter incremented and acks the
/// original id off the partition's pending-entries list. Stream entries are
/// immutable once appended, so bumping the attempt count means writing a
/// fresh entry rather than editing the old one; the fresh entry is
/// unclaimed and is picked up by the next plain `read` on this partition,
/// this time carrying a count the dead-letter ceiling can actually reach.
pub async fn requeue(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
    entry: &StreamEntry,
) -> redis::RedisResult<()> {
    let payload = serde_json::to_string(&entry.envelope).expect("Envelope is serializable");
    let attempts = entry.attempts + 1;
    redis
        .xadd::<_, _, _, String>(
            stream_key(partition),
            "*",
            &[(FIELD, payload), (ATTEMPTS_FIELD, attempts.to_string())],
        )
        .await?;
    ack(redis, partition, group, &entry.id).await
}

/// Moves an entry to the dead-letter stream with its terminal reason and
/// acks it off the originating partition so it is not redelivered.
pub async fn dead_letter(
    redis: &mut ConnectionManager,
    partition: u32,
    group: &str,
    entry: &StreamEntry,
    reason: &str,
) -> redis::RedisResult<()> {
    let payload = serde_json::to_string(&entry.envelope).expect("Envelope is serializable");
    let _: String = redis
        .xadd(
            dead_letter_key(),
            "*",
            &[
                (FIELD, payload),
                ("reason".to_owned(), reason.to_owned()),
                ("attempts".to_owned(), entry.attempts.to_string()),
            ],
        )
        .await?;
    ack(redis, partition, group, &entry.id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_for_is_deterministic_and_conversation_scoped() {
        let a = partition_for("conv-1", 16);
        let b = partition_for("conv-1", 16);
        assert_eq!(a, b);
        assert!(a < 16);
    }

    #[test]
    fn partition_for_spreads_distinct_conversations() {
        let partitions: std::collections::HashSet<u32> = (0..64)
            .map(|i| partition_for(&format!("conv-{i}"), 16))
            .collect();
        assert!(partitions.len() > 1, "hash should not collapse to one bucket");
    }
}

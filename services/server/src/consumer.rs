// C3: persistence consumer pool. One long-lived task per stream partition:
// read a batch, persist each envelope, publish its fan-out event, write
// through to the replay cache, then ack. Steps (a)-(c) all succeed before
// the ack in (d); idempotent inserts at every layer mean a redelivered
// entry (consumer crash before ack, entry reclaimed by another consumer)
// is always safe to reprocess. A failed attempt below the retry ceiling is
// requeued with its attempt count bumped so the ceiling is reachable; a
// periodic stale-entry sweep reclaims anything left pending by a consumer
// that died mid-attempt without ever reaching the failure branch.

use std::time::Duration;

use chat_protocol::Envelope;
use redis::aio::ConnectionManager;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::fanout::{self, FanoutEvent};
use crate::repo;
use crate::replay;
use crate::stream::{self, StreamEntry};

pub const CONSUMER_GROUP: &str = "persisters";

pub struct ConsumerConfig {
    pub partition_count: u32,
    pub batch_max: usize,
    pub poll_interval: Duration,
    pub retry_ceiling: u32,
    pub visibility_timeout_secs: u64,
    pub replay_ttl_secs: u64,
    pub replay_max_per_conversation: u64,
}

/// Spawns one worker per partition. Each worker owns its own Redis
/// connection manager clone and Postgres pool handle; both are cheaply
/// cloneable multiplexed connections, matching how the grounding server's
/// consumer-equivalents share one pool across tasks.
pub fn spawn_workers(
    pool: PgPool,
    redis: ConnectionManager,
    instance_id: String,
    config: ConsumerConfig,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::with_capacity(config.partition_count as usize);
    for partition in 0..config.partition_count {
        let pool = pool.clone();
        let mut redis = redis.clone();
        let consumer_name = format!("{instance_id}-p{partition}");
        let batch_max = config.batch_max;
        let poll_interval = config.poll_interval;
        let retry_ceiling = config.retry_ceiling;
        let visibility_timeout_secs = config.visibility_timeout_secs;
        let replay_ttl_secs = config.replay_ttl_secs;
        let replay_max_per_conversation = config.replay_max_per_conversation;
        let mut shutdown_rx = shutdown.resubscribe();

        let handle = tokio::spawn(async move {
            if let Err(e) = stream::ensure_group(&mut redis, partition, CONSUMER_GROUP).await {
                error!(partition, error = %e, "failed to ensure consumer group");
                return;
            }
            info!(partition, consumer = %consumer_name, "persistence worker started");

            // Periodically sweeps entries idle past the visibility timeout --
            // left pending by a consumer that crashed or was killed before it
            // could ack or retry-requeue them -- and hands them to this
            // worker for another attempt.
            let mut claim_interval = tokio::time::interval(Duration::from_secs(visibility_timeout_secs.max(1)));

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(partition, "persistence worker shutting down");
                        break;
                    }
                    _ = claim_interval.tick() => {
                        match stream::claim_stale(
                            &mut redis,
                            partition,
                            CONSUMER_GROUP,
                            &consumer_name,
                            visibility_timeout_secs * 1000,
                            batch_max,
                        )
                        .await
                        {
                            Ok(entries) if !entries.is_empty() => {
                                info!(partition, count = entries.len(), "reclaimed stale entries past visibility timeout");
                                for entry in entries {
                                    process_entry(
                                        &pool,
                                        &mut redis,
                                        partition,
                                        entry,
                                        retry_ceiling,
                                        replay_ttl_secs,
                                        replay_max_per_conversation,
                                    )
                                    .await;
                                }
                            }
                            Ok(_) => {}
                            Err(e) => warn!(partition, error = %e, "stale-entry reclaim failed"),
                        }
                    }
                    entries = stream::read(&mut redis, partition, CONSUMER_GROUP, &consumer_name, batch_max) => {
                        match entries {
                            Ok(entries) if !entries.is_empty() => {
                                for entry in entries {
                                    process_entry(
                                        &pool,
                                        &mut redis,
                                        partition,
                                        entry,
                                        retry_ceiling,
                                        replay_ttl_secs,
                                        replay_max_per_conversation,
                                    )
                                    .await;
                                }
                            }
                            Ok(_) => {
                                tokio::time::sleep(poll_interval).await;
                            }
                            Err(e) => {
                                warn!(partition, error = %e, "stream read failed, backing off");
                                tokio::time::sleep(poll_interval).await;
                            }
                        }
                    }
                }
            }
        });
        handles.push(handle);
        shutdown = shutdown.resubscribe();
    }
    handles
}

async fn process_entry(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    partition: u32,
    entry: StreamEntry,
    retry_ceiling: u32,
    replay_ttl_secs: u64,
    replay_max_per_conversation: u64,
) {
    match persist_and_fan_out(pool, redis, &entry.envelope, replay_ttl_secs, replay_max_per_conversation).await {
        Ok(()) => {
            if let Err(e) = stream::ack(redis, partition, CONSUMER_GROUP, &entry.id).await {
                warn!(message_id = %entry.envelope.message_id, error = %e, "ack failed after successful persist");
            }
        }
        Err(e) => {
            warn!(
                message_id = %entry.envelope.message_id,
                attempts = entry.attempts,
                error = %e,
                "persistence attempt failed"
            );
            if entry.attempts + 1 >= retry_ceiling {
                if let Err(e) = stream::dead_letter(redis, partition, CONSUMER_GROUP, &entry, &e.to_string()).await {
                    error!(message_id = %entry.envelope.message_id, error = %e, "failed to dead-letter envelope");
                }
            } else if let Err(e) = stream::requeue(redis, partition, CONSUMER_GROUP, &entry).await {
                error!(message_id = %entry.envelope.message_id, error = %e, "failed to requeue entry for retry");
            }
        }
    }
}

async fn persist_and_fan_out(
    pool: &PgPool,
    redis: &mut ConnectionManager,
    envelope: &Envelope,
    replay_ttl_secs: u64,
    replay_max_per_conversation: u64,
) -> Result<(), sqlx::Error> {
    repo::messages::insert_message(
        pool,
        envelope.message_id,
        &envelope.conversation_id,
        &envelope.sender_id,
        &envelope.content,
        envelope.content_type,
        &envelope.metadata,
        &envelope.idempotency_key,
        envelope.correlation_id,
        envelope.accepted_at,
    )
    .await?;
    repo::conversations::touch_last_activity(pool, &envelope.conversation_id).await?;

    let subject = fanout::conversation_subject(&envelope.conversation_id);
    let event = FanoutEvent::MessageReceive(envelope.clone());
    // Bus publish failures are recovered-locally per §7: log and continue,
    // the recipient's reconnect replay (C6/database) is the backstop.
    if let Err(e) = fanout::publish(redis, &subject, &event).await {
        warn!(message_id = %envelope.message_id, error = %e, "fan-out publish failed");
    }

    if let Err(e) = replay::store(redis, envelope, replay_ttl_secs, replay_max_per_conversation).await {
        warn!(message_id = %envelope.message_id, error = %e, "replay cache write failed");
    }

    Ok(())
}

// C5: fan-out bus. Cross-instance pub/sub over Redis PUBLISH/SUBSCRIBE,
// keyed by conversation id (message/typing events) or user id (presence,
// receipt state-change events). Not durable -- a missed event is recovered
// by the recipient's reconnect-driven replay through C6, never retried here.

use chat_protocol::{Envelope, ReceiptState, TypingFrame};
use futures_util::StreamExt;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

pub fn conversation_subject(conversation_id: &str) -> String {
    format!("chat:conv:{conversation_id}")
}

pub fn user_subject(user_id: &str) -> String {
    format!("chat:user:{user_id}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FanoutEvent {
    MessageReceive(Envelope),
    Presence { user_id: String, online: bool },
    Typing(TypingFrame),
    ReceiptUpdate {
        message_id: Uuid,
        recipient_id: String,
        state: ReceiptState,
    },
}

pub async fn publish(
    redis: &mut ConnectionManager,
    subject: &str,
    event: &FanoutEvent,
) -> redis::RedisResult<()> {
    let payload = serde_json::to_string(event).expect("FanoutEvent is serializable");
    redis.publish::<_, _, ()>(subject, payload).await
}

/// A live, dynamically-adjustable set of subject subscriptions for one
/// socket session. Each subject gets its own dedicated pub/sub connection
/// and forwarding task (Redis pub/sub connections can't be multiplexed with
/// command connections, and subscribing/unsubscribing mid-stream on a
/// shared connection would race against `on_message`'s exclusive borrow);
/// all tasks funnel into one shared channel the session selects on.
/// Dropping the subscription aborts every outstanding task.
pub struct FanoutSubscription {
    redis_url: String,
    tx: mpsc::Sender<FanoutEvent>,
    rx: mpsc::Receiver<FanoutEvent>,
    tasks: std::collections::HashMap<String, tokio::task::JoinHandle<()>>,
}

impl FanoutSubscription {
    pub fn new(redis_url: &str) -> Self {
        let (tx, rx) = mpsc::channel(256);
        Self {
            redis_url: redis_url.to_owned(),
            tx,
            rx,
            tasks: std::collections::HashMap::new(),
        }
    }

    /// Subscribes to `subject` if not already subscribed. A no-op on repeat
    /// calls for the same subject (idempotent, matching `join` being safe to
    /// send more than once for the same conversation).
    pub async fn subscribe(&mut self, subject: &str) -> redis::RedisResult<()> {
        if self.tasks.contains_key(subject) {
            return Ok(());
        }
        let client = redis::Client::open(self.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(subject).await?;

        let tx = self.tx.clone();
        let task = tokio::spawn(async move {
            let mut stream = pubsub.on_message();
            while let Some(msg) = stream.next().await {
                let Ok(payload) = msg.get_payload::<String>() else {
                    continue;
                };
                let Ok(event) = serde_json::from_str::<FanoutEvent>(&payload) else {
                    continue;
                };
                if tx.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.tasks.insert(subject.to_owned(), task);
        Ok(())
    }

    /// Tears down `subject`'s connection and task. A no-op if not subscribed.
    pub fn unsubscribe(&mut self, subject: &str) {
        if let Some(task) = self.tasks.remove(subject) {
            task.abort();
        }
    }

    pub async fn recv(&mut self) -> Option<FanoutEvent> {
        self.rx.recv().await
    }
}

impl Drop for FanoutSubscription {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_event_round_trips_through_json() {
        let event = FanoutEvent::Presence {
            user_id: "u1".to_owned(),
            online: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: FanoutEvent = serde_json::from_str(&json).unwrap();
        match back {
            FanoutEvent::Presence { user_id, online } => {
                assert_eq!(user_id, "u1");
                assert!(online);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn subject_naming_is_stable() {
        assert_eq!(conversation_subject("c1"), "chat:conv:c1");
        assert_eq!(user_subject("u1"), "chat:user:u1");
    }
}

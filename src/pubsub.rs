//! Generic publish/subscribe transport abstraction (spec §4.1).
//!
//! `PubSub` is the seam a real messaging system (NATS, JetStream, a broker)
//! would implement. `InProcessPubSub` is the in-process substrate used as the
//! default transport and in tests, built on `tokio::sync::mpsc` fan-out
//! channels the way the teacher's `main.rs` wires up its own task channels.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::BusError;

/// Raw bytes published to a subject, plus an optional reply subject for
/// request/reply semantics (spec §4.1 "request-reply with subjects").
#[derive(Debug, Clone)]
pub struct Message {
    pub subject: String,
    pub payload: Vec<u8>,
    pub reply_to: Option<String>,
}

/// A live subscription. Dropping the receiver closes the channel; the
/// sender side is pruned lazily the next time that subject is published to.
pub struct Subscription {
    pub id: Uuid,
    subject: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

/// Transport-level publish/subscribe/request contract (spec §4.1).
///
/// Delivery is at-least-once; there is no ordering guarantee across
/// subjects, matching spec §4.1's explicit non-guarantee.
#[async_trait]
pub trait PubSub: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError>;

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError>;

    /// Publishes `payload` to `subject` with a generated reply subject,
    /// subscribes to it, and waits up to `timeout` for a single reply.
    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError>;
}

#[derive(Default)]
struct Topic {
    senders: Vec<mpsc::UnboundedSender<Message>>,
}

/// In-process fan-out substrate: every `publish` is cloned to every current
/// subscriber of the subject. Reply subjects are plain subjects, so
/// `request` is just `subscribe` + `publish` + a oneshot timeout race.
pub struct InProcessPubSub {
    topics: Mutex<HashMap<String, Topic>>,
}

impl InProcessPubSub {
    pub fn new() -> Self {
        InProcessPubSub {
            topics: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for InProcessPubSub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PubSub for InProcessPubSub {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BusError> {
        let mut topics = self.topics.lock().unwrap();
        if let Some(topic) = topics.get_mut(subject) {
            let msg = Message {
                subject: subject.to_string(),
                payload,
                reply_to: None,
            };
            topic.senders.retain(|tx| tx.send(msg.clone()).is_ok());
        }
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription, BusError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut topics = self.topics.lock().unwrap();
        topics.entry(subject.to_string()).or_default().senders.push(tx);
        Ok(Subscription {
            id: Uuid::new_v4(),
            subject: subject.to_string(),
            rx,
        })
    }

    async fn request(
        &self,
        subject: &str,
        payload: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, BusError> {
        let reply_subject = format!("_reply.{}", Uuid::new_v4());
        let mut reply_sub = self.subscribe(&reply_subject).await?;

        let msg = Message {
            subject: subject.to_string(),
            payload,
            reply_to: Some(reply_subject),
        };
        {
            let mut topics = self.topics.lock().unwrap();
            if let Some(topic) = topics.get_mut(subject) {
                topic.senders.retain(|tx| tx.send(msg.clone()).is_ok());
            } else {
                return Err(BusError::NoResponder);
            }
        }

        match tokio::time::timeout(timeout, reply_sub.recv()).await {
            Ok(Some(reply)) => Ok(reply.payload),
            Ok(None) => Err(BusError::NoResponder),
            Err(_) => Err(BusError::Timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_all_subscribers() {
        let bus = InProcessPubSub::new();
        let mut a = bus.subscribe("trades").await.unwrap();
        let mut b = bus.subscribe("trades").await.unwrap();

        bus.publish("trades", b"hello".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"hello");
        assert_eq!(b.recv().await.unwrap().payload, b"hello");
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_is_not_an_error() {
        let bus = InProcessPubSub::new();
        bus.publish("nobody-home", b"x".to_vec()).await.unwrap();
    }

    #[tokio::test]
    async fn request_times_out_with_no_responder() {
        let bus = InProcessPubSub::new();
        let err = bus
            .request("missing", b"x".to_vec(), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::NoResponder));
    }

    #[tokio::test]
    async fn request_round_trips_through_reply_subject() {
        let bus = std::sync::Arc::new(InProcessPubSub::new());
        let mut req_sub = bus.subscribe("svc.echo").await.unwrap();

        let responder = {
            let bus = bus.clone();
            tokio::spawn(async move {
                let msg = req_sub.recv().await.unwrap();
                let reply_to = msg.reply_to.unwrap();
                bus.publish(&reply_to, msg.payload).await.unwrap();
            })
        };

        let reply = bus
            .request("svc.echo", b"ping".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(reply, b"ping");
        responder.await.unwrap();
    }
}

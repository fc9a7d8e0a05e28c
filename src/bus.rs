//! Typed event bus over the raw `PubSub` transport (spec §4.2).
//!
//! Wraps `PubSub` with typed `emit`/`on`/`register_rpc`/`call_rpc` operations.
//! Payloads are framed as a small self-describing envelope: a length-prefixed
//! UTF-8 type tag followed by a length-prefixed MessagePack payload (see
//! SPEC_FULL.md §3 and DESIGN.md). Decode failures are dropped and logged,
//! never propagated to the caller; RPC handler panics are converted into an
//! `INTERNAL` error reply instead of unwinding across the bus.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{error, warn};

use crate::error::{BusError, ErrorCode};
use crate::pubsub::PubSub;

/// RPC envelope: either a successful payload or a structured error.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
enum RpcReply {
    Ok(Vec<u8>),
    Err { code: ErrorCode, message: String },
}

fn encode_envelope<T: Serialize>(type_tag: &str, value: &T) -> Result<Vec<u8>, BusError> {
    let payload = rmp_serde::to_vec_named(value).map_err(|e| BusError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(4 + type_tag.len() + 4 + payload.len());
    buf.extend_from_slice(&(type_tag.len() as u32).to_be_bytes());
    buf.extend_from_slice(type_tag.as_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

fn decode_envelope<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, BusError> {
    if bytes.len() < 4 {
        return Err(BusError::Decode("envelope truncated (tag length)".into()));
    }
    let tag_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    let rest = &bytes[4..];
    if rest.len() < tag_len + 4 {
        return Err(BusError::Decode("envelope truncated (tag body)".into()));
    }
    let payload_len_at = tag_len + 4;
    let payload_len =
        u32::from_be_bytes(rest[tag_len..payload_len_at].try_into().unwrap()) as usize;
    let payload = &rest[payload_len_at..];
    if payload.len() != payload_len {
        return Err(BusError::Decode("envelope truncated (payload body)".into()));
    }
    rmp_serde::from_slice(payload).map_err(|e| BusError::Decode(e.to_string()))
}

/// Typed wrapper around a `PubSub` transport (spec §4.2).
pub struct EventBus {
    transport: Arc<dyn PubSub>,
}

impl EventBus {
    pub fn new(transport: Arc<dyn PubSub>) -> Self {
        EventBus { transport }
    }

    /// Publishes a typed event to `subject`.
    pub async fn emit<T: Serialize + Sync>(&self, subject: &str, event: &T) -> Result<(), BusError> {
        let bytes = encode_envelope(subject, event)?;
        self.transport.publish(subject, bytes).await
    }

    /// Subscribes to `subject`, decoding every message as `T`. Messages that
    /// fail to decode are dropped and logged rather than surfaced.
    pub async fn on<T, F>(&self, subject: &str, mut handler: F) -> Result<(), BusError>
    where
        T: DeserializeOwned + Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let mut sub = self.transport.subscribe(subject).await?;
        let subject_owned = subject.to_string();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                match decode_envelope::<T>(&msg.payload) {
                    Ok(event) => handler(event),
                    Err(e) => warn!(subject = %subject_owned, error = %e, "dropping undecodable event"),
                }
            }
        });
        Ok(())
    }

    /// Registers a request handler on `subject`. Handler panics are caught
    /// and converted into an `INTERNAL` error reply.
    pub async fn register_rpc<Req, Resp, F>(
        &self,
        subject: &str,
        handler: F,
    ) -> Result<(), BusError>
    where
        Req: DeserializeOwned + Send + 'static,
        Resp: Serialize + Send + 'static,
        F: Fn(Req) -> Result<Resp, (ErrorCode, String)> + Send + Sync + 'static,
    {
        let mut sub = self.transport.subscribe(subject).await?;
        let transport = self.transport.clone();
        let subject_owned = subject.to_string();
        tokio::spawn(async move {
            while let Some(msg) = sub.recv().await {
                let Some(reply_to) = msg.reply_to.clone() else {
                    warn!(subject = %subject_owned, "RPC request with no reply_to, dropping");
                    continue;
                };
                let req = match decode_envelope::<Req>(&msg.payload) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!(subject = %subject_owned, error = %e, "dropping undecodable RPC request");
                        let reply = RpcReply::Err {
                            code: ErrorCode::SerializationError,
                            message: e.to_string(),
                        };
                        if let Ok(bytes) = encode_envelope(&reply_to, &reply) {
                            let _ = transport.publish(&reply_to, bytes).await;
                        }
                        continue;
                    }
                };

                let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(req)));
                let reply = match outcome {
                    Ok(Ok(resp)) => match rmp_serde::to_vec_named(&resp) {
                        Ok(bytes) => RpcReply::Ok(bytes),
                        Err(e) => RpcReply::Err {
                            code: ErrorCode::SerializationError,
                            message: e.to_string(),
                        },
                    },
                    Ok(Err((code, message))) => RpcReply::Err { code, message },
                    Err(panic) => {
                        let msg = panic_message(&panic);
                        error!(subject = %subject_owned, panic = %msg, "RPC handler panicked");
                        RpcReply::Err {
                            code: ErrorCode::Internal,
                            message: msg,
                        }
                    }
                };

                if let Ok(bytes) = encode_envelope(&reply_to, &reply) {
                    if let Err(e) = transport.publish(&reply_to, bytes).await {
                        warn!(subject = %reply_to, error = %e, "failed to publish RPC reply");
                    }
                }
            }
        });
        Ok(())
    }

    /// Calls an RPC registered with `register_rpc`, waiting up to `timeout`
    /// for a reply (spec §4.2: `CallRPC(subject, request, factory, timeout)`).
    pub async fn call_rpc<Req, Resp>(
        &self,
        subject: &str,
        req: &Req,
        timeout: Duration,
    ) -> Result<Resp, BusError>
    where
        Req: Serialize + Sync,
        Resp: DeserializeOwned,
    {
        let bytes = encode_envelope(subject, req)?;
        let reply_bytes = self.transport.request(subject, bytes, timeout).await?;
        match decode_envelope::<RpcReply>(&reply_bytes)? {
            RpcReply::Ok(payload) => {
                rmp_serde::from_slice(&payload).map_err(|e| BusError::Decode(e.to_string()))
            }
            RpcReply::Err { message, .. } => Err(BusError::Transport(message)),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pubsub::InProcessPubSub;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn emit_and_on_round_trip_typed_event() {
        let bus = EventBus::new(Arc::new(InProcessPubSub::new()));
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<u32>();

        bus.on::<u32, _>("counter", move |v| {
            let _ = tx.send(v);
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        bus.emit("counter", &7u32).await.unwrap();
        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received, 7);
    }

    #[tokio::test]
    async fn register_rpc_and_call_rpc_round_trip() {
        let bus = EventBus::new(Arc::new(InProcessPubSub::new()));
        bus.register_rpc::<u32, u32, _>("double", |n: u32| Ok(n * 2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let result: u32 = bus.call_rpc("double", &21u32, Duration::from_secs(5)).await.unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn rpc_handler_panic_becomes_internal_error() {
        let bus = EventBus::new(Arc::new(InProcessPubSub::new()));
        bus.register_rpc::<u32, u32, _>("boom", |_: u32| -> Result<u32, (ErrorCode, String)> {
            panic!("kaboom")
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = bus
            .call_rpc::<u32, u32>("boom", &1u32, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::Transport(_)));
    }

    #[tokio::test]
    async fn undecodable_event_is_dropped_not_propagated() {
        let bus = EventBus::new(Arc::new(InProcessPubSub::new()));
        let count = Arc::new(AtomicU32::new(0));
        let count_clone = count.clone();
        bus.on::<u32, _>("numbers", move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        // publish raw garbage directly on the transport, bypassing emit()
        bus.transport.publish("numbers", b"not an envelope".to_vec()).await.unwrap();
        bus.emit("numbers", &5u32).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

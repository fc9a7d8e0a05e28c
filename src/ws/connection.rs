//! Single-stream WebSocket connection with ping/pong discipline and bounded
//! reconnection (spec §4.5). Generalizes the teacher's
//! `binance::websocket::BinanceWebSocketClient::connect_with_retry` reconnect
//! loop and `orderbook::websocket::DepthWebSocketClient`'s per-stream ping
//! task into an explicit state machine with a callback trait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::{frame::coding::CloseCode, CloseFrame};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::WsError;

const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const READ_DEADLINE: Duration = Duration::from_secs(65);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(180);
const CLOSE_QUIESCENCE: Duration = Duration::from_millis(10);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// Callback surface for one stream connection (spec §4.5, §9: "a single
/// trait per stream type with default no-op methods").
pub trait StreamCallbacks: Send + Sync {
    fn on_connect(&self) {}
    fn on_reconnect(&self) {}
    fn on_error(&self, _err: &WsError) {}
    fn on_message(&self, _payload: &[u8]) {}
    fn on_close(&self) {}
}

struct Shared {
    state: StreamState,
    reconnect_count: u32,
    outbound: Option<mpsc::Sender<Message>>,
}

/// Owns one logical stream: connect, read/ping/reconnect loops, disconnect
/// (spec §4.5). All state mutation goes through `shared`; callbacks are
/// invoked outside the lock.
pub struct StreamConnection {
    pub stream_name: String,
    url: String,
    max_reconnects: i64,
    callbacks: Arc<dyn StreamCallbacks>,
    shared: Mutex<Shared>,
    cancel: CancellationToken,
    closed: AtomicBool,
}

impl StreamConnection {
    pub fn new(
        stream_name: impl Into<String>,
        url: impl Into<String>,
        callbacks: Arc<dyn StreamCallbacks>,
        max_reconnects: i64,
    ) -> Arc<Self> {
        Arc::new(StreamConnection {
            stream_name: stream_name.into(),
            url: url.into(),
            max_reconnects,
            callbacks,
            shared: Mutex::new(Shared {
                state: StreamState::Disconnected,
                reconnect_count: 0,
                outbound: None,
            }),
            cancel: CancellationToken::new(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn state(&self) -> StreamState {
        self.shared.lock().unwrap().state
    }

    fn set_state(&self, state: StreamState) {
        self.shared.lock().unwrap().state = state;
    }

    /// Dials the stream and, on success, starts the read/ping/reconnect
    /// loops in the background.
    pub async fn connect(self: &Arc<Self>) -> Result<(), WsError> {
        self.set_state(StreamState::Connecting);
        match dial(&self.url).await {
            Ok(stream) => {
                self.set_state(StreamState::Connected);
                self.callbacks.on_connect();
                let this = self.clone();
                tokio::spawn(async move { this.supervise(stream).await });
                Ok(())
            }
            Err(e) => {
                self.set_state(StreamState::Disconnected);
                self.callbacks.on_error(&e);
                Err(e)
            }
        }
    }

    /// Idempotent graceful close (spec §4.5 "disconnect is idempotent").
    pub async fn disconnect(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        tokio::time::sleep(CLOSE_QUIESCENCE).await;
        let outbound = self.shared.lock().unwrap().outbound.clone();
        if let Some(tx) = outbound {
            let _ = tx
                .send(Message::Close(Some(CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                })))
                .await;
        }
        self.set_state(StreamState::Closed);
        self.callbacks.on_close();
    }

    async fn supervise(self: Arc<Self>, mut stream: WsStream) {
        loop {
            let gen_cancel = self.cancel.child_token();
            let err = self.run_generation(stream, gen_cancel).await;

            if self.cancel.is_cancelled() {
                return;
            }

            self.set_state(StreamState::Reconnecting);
            self.callbacks.on_error(&err);

            stream = match self.reconnect_loop().await {
                Some(s) => s,
                None => return,
            };
        }
    }

    /// Sleeps the constant backoff, redials, and retries until success, a
    /// cancellation, or `max_reconnects` is exhausted. The budget is only
    /// charged against a failed dial, so `max_reconnects = 1` still gets one
    /// real attempt before giving up.
    async fn reconnect_loop(&self) -> Option<WsStream> {
        loop {
            tokio::time::sleep(RECONNECT_DELAY).await;
            if self.cancel.is_cancelled() {
                return None;
            }

            self.set_state(StreamState::Connecting);
            match dial(&self.url).await {
                Ok(stream) => {
                    self.set_state(StreamState::Connected);
                    self.callbacks.on_reconnect();
                    return Some(stream);
                }
                Err(e) => {
                    self.callbacks.on_error(&e);

                    let count = {
                        let mut shared = self.shared.lock().unwrap();
                        shared.reconnect_count += 1;
                        shared.reconnect_count
                    };
                    if self.max_reconnects > 0 && count as i64 >= self.max_reconnects {
                        self.set_state(StreamState::Closed);
                        self.callbacks.on_error(&WsError::MaxReconnects);
                        if !self.closed.swap(true, Ordering::SeqCst) {
                            self.callbacks.on_close();
                        }
                        return None;
                    }
                }
            }
        }
    }

    /// Runs the read/ping/write tasks for one connection generation until
    /// the first error, returning it. Three cooperative tasks per spec §4.5.
    async fn run_generation(&self, stream: WsStream, cancel: CancellationToken) -> WsError {
        let (sink, mut source) = stream.split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Message>(32);
        let (err_tx, mut err_rx) = mpsc::channel::<WsError>(1);

        self.shared.lock().unwrap().outbound = Some(outbound_tx.clone());

        // writer task
        let write_cancel = cancel.clone();
        let write_err_tx = err_tx.clone();
        let mut sink = sink;
        let writer = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = write_cancel.cancelled() => break,
                    msg = outbound_rx.recv() => {
                        match msg {
                            Some(msg) => {
                                if let Err(e) = sink.send(msg).await {
                                    let _ = write_err_tx.try_send(WsError::Closed);
                                    warn!(error = %e, "websocket write failed");
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        // ping task: unsolicited liveness pong every ping interval
        let ping_cancel = cancel.clone();
        let ping_tx = outbound_tx.clone();
        let pinger = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEFAULT_PING_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = ping_cancel.cancelled() => break,
                    _ = interval.tick() => {
                        if ping_tx.send(Message::Pong(Vec::new().into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        // read task
        let callbacks = self.callbacks.clone();
        let read_cancel = cancel.clone();
        let read_tx = outbound_tx.clone();
        let read_err_tx = err_tx.clone();
        let reader = tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    _ = read_cancel.cancelled() => break,
                    frame = tokio::time::timeout(READ_DEADLINE, source.next()) => frame,
                };
                match frame {
                    Ok(Some(Ok(Message::Text(text)))) => callbacks.on_message(text.as_bytes()),
                    Ok(Some(Ok(Message::Binary(bin)))) => callbacks.on_message(&bin),
                    Ok(Some(Ok(Message::Ping(payload)))) => {
                        let _ = read_tx.send(Message::Pong(payload)).await;
                    }
                    Ok(Some(Ok(Message::Pong(_)))) => {}
                    Ok(Some(Ok(Message::Close(_)))) => {
                        let _ = read_err_tx.try_send(WsError::Closed);
                        break;
                    }
                    Ok(Some(Ok(Message::Frame(_)))) => {}
                    Ok(Some(Err(e))) => {
                        warn!(error = %e, "websocket read error");
                        let _ = read_err_tx.try_send(WsError::Closed);
                        break;
                    }
                    Ok(None) => {
                        let _ = read_err_tx.try_send(WsError::Closed);
                        break;
                    }
                    Err(_) => {
                        warn!("websocket read deadline exceeded");
                        let _ = read_err_tx.try_send(WsError::Closed);
                        break;
                    }
                }
            }
        });

        let err = tokio::select! {
            _ = cancel.cancelled() => WsError::Closed,
            e = err_rx.recv() => e.unwrap_or(WsError::Closed),
        };

        cancel.cancel();
        let _ = tokio::join!(reader, pinger, writer);
        self.shared.lock().unwrap().outbound = None;
        err
    }
}

async fn dial(url: &str) -> Result<WsStream, WsError> {
    info!(url, "dialing websocket");
    match tokio::time::timeout(DIAL_TIMEOUT, connect_async(url)).await {
        Ok(Ok((stream, _))) => Ok(stream),
        Ok(Err(e)) => {
            error!(url, error = %e, "websocket dial failed");
            Err(WsError::Dial(e.to_string()))
        }
        Err(_) => Err(WsError::Dial("dial timed out".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingCallbacks {
        connects: std::sync::atomic::AtomicUsize,
        closes: std::sync::atomic::AtomicUsize,
    }

    impl StreamCallbacks for RecordingCallbacks {
        fn on_connect(&self) {
            self.connects.fetch_add(1, Ordering::SeqCst);
        }
        fn on_close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn disconnect_without_connect_is_idempotent_and_fires_close_once() {
        let cb = Arc::new(RecordingCallbacks {
            connects: Default::default(),
            closes: Default::default(),
        });
        let conn = StreamConnection::new("test", "wss://example.invalid/ws", cb.clone(), -1);
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(cb.closes.load(Ordering::SeqCst), 1);
        assert_eq!(conn.state(), StreamState::Closed);
    }

    #[test]
    fn initial_state_is_disconnected() {
        let cb = Arc::new(RecordingCallbacks {
            connects: Default::default(),
            closes: Default::default(),
        });
        let conn = StreamConnection::new("test", "wss://example.invalid/ws", cb, -1);
        assert_eq!(conn.state(), StreamState::Disconnected);
    }
}

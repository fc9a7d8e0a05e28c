//! User-data stream: a stream connection (§4.5) plus a listen-key lifecycle
//! (spec §4.6) performed against the REST collaborator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{RestError, WsError};
use crate::rest::ExchangeRestClient;
use crate::ws::connection::{StreamCallbacks, StreamConnection, StreamState};

const REFRESH_INTERVAL: Duration = Duration::from_secs(55 * 60);

/// Superset of `StreamConnection` that holds a listen key and refreshes it
/// on a 55-minute interval (spec §4.6). Reconnection on key rotation is
/// iterative, never recursive (spec §9 design note).
pub struct UserDataConnection {
    base_url: String,
    rest: Arc<dyn ExchangeRestClient>,
    callbacks: Arc<dyn StreamCallbacks>,
    max_reconnects: i64,
    listen_key: Mutex<Option<String>>,
    inner: Mutex<Option<Arc<StreamConnection>>>,
    cancel: CancellationToken,
}

impl UserDataConnection {
    pub fn new(
        base_url: impl Into<String>,
        rest: Arc<dyn ExchangeRestClient>,
        callbacks: Arc<dyn StreamCallbacks>,
        max_reconnects: i64,
    ) -> Arc<Self> {
        Arc::new(UserDataConnection {
            base_url: base_url.into(),
            rest,
            callbacks,
            max_reconnects,
            listen_key: Mutex::new(None),
            inner: Mutex::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn state(&self) -> StreamState {
        self.inner
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.state())
            .unwrap_or(StreamState::Disconnected)
    }

    /// Obtains a usable listen key: keepalive the held key, or start a fresh
    /// one if none is held or the held one went missing (spec §4.6 step 1).
    async fn ensure_listen_key(&self) -> Result<String, RestError> {
        let held = self.listen_key.lock().unwrap().clone();
        match held {
            None => {
                let key = self.rest.start_user_data_stream().await?;
                *self.listen_key.lock().unwrap() = Some(key.clone());
                Ok(key)
            }
            Some(key) => match self.rest.keepalive_user_data_stream(&key).await {
                Ok(()) => Ok(key),
                Err(RestError::ListenKeyMissing) => {
                    *self.listen_key.lock().unwrap() = None;
                    let fresh = self.rest.start_user_data_stream().await?;
                    *self.listen_key.lock().unwrap() = Some(fresh.clone());
                    Ok(fresh)
                }
                Err(e) => Err(e),
            },
        }
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), WsError> {
        let key = self
            .ensure_listen_key()
            .await
            .map_err(|e| WsError::Dial(e.to_string()))?;
        self.dial_with_key(&key).await?;
        self.spawn_refresh();
        Ok(())
    }

    async fn dial_with_key(self: &Arc<Self>, key: &str) -> Result<(), WsError> {
        let url = format!("{}/ws/{}", self.base_url, key);
        let conn = StreamConnection::new("user-data", url, self.callbacks.clone(), self.max_reconnects);
        conn.connect().await?;
        *self.inner.lock().unwrap() = Some(conn);
        Ok(())
    }

    fn spawn_refresh(self: &Arc<Self>) {
        let this = self.clone();
        let cancel = self.cancel.child_token();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REFRESH_INTERVAL);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => this.refresh_once().await,
                }
            }
        });
    }

    /// One refresh cycle (spec §4.6 step 3). REST errors never crash the
    /// stream; they only trigger reconnection, the same as socket errors.
    async fn refresh_once(self: &Arc<Self>) {
        let key = match self.listen_key.lock().unwrap().clone() {
            Some(k) => k,
            None => return,
        };
        match self.rest.keepalive_user_data_stream(&key).await {
            Ok(()) => {}
            Err(e) => {
                warn!(error = %e, "listen key keepalive failed, rotating");
                match self.rest.start_user_data_stream().await {
                    Ok(fresh) => {
                        *self.listen_key.lock().unwrap() = Some(fresh.clone());
                        let old = self.inner.lock().unwrap().take();
                        if let Some(old) = old {
                            old.disconnect().await;
                        }
                        if let Err(e) = self.dial_with_key(&fresh).await {
                            warn!(error = %e, "reconnect with rotated listen key failed");
                        }
                    }
                    Err(e) => warn!(error = %e, "listen key rotation failed, will retry next interval"),
                }
            }
        }
    }

    /// Closes the underlying stream and best-effort releases the listen key
    /// (spec §4.6 step 4).
    pub async fn disconnect(&self) {
        self.cancel.cancel();
        let conn = self.inner.lock().unwrap().take();
        if let Some(conn) = conn {
            conn.disconnect().await;
        }
        let key = self.listen_key.lock().unwrap().take();
        if let Some(key) = key {
            if let Err(e) = self.rest.close_user_data_stream(&key).await {
                warn!(error = %e, "closeUserDataStream failed (best-effort)");
            }
        }
    }
}

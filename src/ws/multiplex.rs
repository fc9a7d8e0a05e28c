//! WebSocket multiplex client (spec §4.7): tracks named subscriptions, one
//! `StreamConnection` per subscription, routes inbound frames to typed
//! handlers by the `e` event-type discriminator. Generalizes the teacher's
//! `orderbook::manager::OrderBookManager` per-symbol connection map.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::WsError;
use crate::ws::connection::{StreamCallbacks, StreamConnection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthLevel {
    L5,
    L10,
    L20,
}

impl FromStr for DepthLevel {
    type Err = WsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "5" => Ok(DepthLevel::L5),
            "10" => Ok(DepthLevel::L10),
            "20" => Ok(DepthLevel::L20),
            other => Err(WsError::InvalidParameter(format!("depth level: {other}"))),
        }
    }
}

impl DepthLevel {
    fn as_str(&self) -> &'static str {
        match self {
            DepthLevel::L5 => "5",
            DepthLevel::L10 => "10",
            DepthLevel::L20 => "20",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepthSpeed {
    Ms100,
    Ms250,
    Ms500,
}

impl FromStr for DepthSpeed {
    type Err = WsError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "100ms" => Ok(DepthSpeed::Ms100),
            "250ms" => Ok(DepthSpeed::Ms250),
            "500ms" => Ok(DepthSpeed::Ms500),
            other => Err(WsError::InvalidParameter(format!("depth speed: {other}"))),
        }
    }
}

impl DepthSpeed {
    fn suffix(&self) -> Option<&'static str> {
        match self {
            DepthSpeed::Ms100 => None,
            DepthSpeed::Ms250 => Some("250ms"),
            DepthSpeed::Ms500 => Some("500ms"),
        }
    }
}

/// Decoded payload variants routed by the `e` field (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "e")]
pub enum StreamEvent {
    #[serde(rename = "kline")]
    Kline(KlineEvent),
    #[serde(rename = "aggTrade")]
    AggTrade(AggTradeEvent),
    #[serde(rename = "24hrTicker")]
    Ticker(TickerEvent),
    #[serde(rename = "forceOrder")]
    Liquidation(LiquidationEvent),
    #[serde(rename = "depthUpdate")]
    Depth(DepthEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "k")]
    pub kline: KlineDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineDetail {
    #[serde(rename = "t")]
    pub open_time: i64,
    #[serde(rename = "T")]
    pub close_time: i64,
    #[serde(rename = "o")]
    pub open: String,
    #[serde(rename = "c")]
    pub close: String,
    #[serde(rename = "h")]
    pub high: String,
    #[serde(rename = "l")]
    pub low: String,
    #[serde(rename = "v")]
    pub volume: String,
    #[serde(rename = "x")]
    pub is_closed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggTradeEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "a")]
    pub agg_trade_id: i64,
    #[serde(rename = "p")]
    pub price: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "T")]
    pub trade_time: i64,
    #[serde(rename = "m")]
    pub is_buyer_maker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "c")]
    pub last_price: String,
    #[serde(rename = "P")]
    pub price_change_percent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "o")]
    pub order: LiquidationOrder,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiquidationOrder {
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "S")]
    pub side: String,
    #[serde(rename = "q")]
    pub quantity: String,
    #[serde(rename = "p")]
    pub price: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DepthEvent {
    #[serde(rename = "E")]
    pub event_time: i64,
    #[serde(rename = "s")]
    pub symbol: String,
    #[serde(rename = "b")]
    pub bids: Vec<[String; 2]>,
    #[serde(rename = "a")]
    pub asks: Vec<[String; 2]>,
}

/// Callback set for one subscription (spec §4.7 "callback uniformity").
/// Invoked on internal tasks; implementers MUST NOT block them.
pub trait SubscriptionHandler: Send + Sync {
    fn on_connect(&self) {}
    fn on_reconnect(&self) {}
    fn on_error(&self, _err: &WsError) {}
    fn on_event(&self, _event: StreamEvent) {}
    fn on_disconnect(&self) {}
}

struct RoutingCallbacks {
    expected_tag: &'static str,
    handler: Arc<dyn SubscriptionHandler>,
}

impl StreamCallbacks for RoutingCallbacks {
    fn on_connect(&self) {
        self.handler.on_connect();
    }
    fn on_reconnect(&self) {
        self.handler.on_reconnect();
    }
    fn on_error(&self, err: &WsError) {
        self.handler.on_error(err);
    }
    fn on_close(&self) {
        self.handler.on_disconnect();
    }
    fn on_message(&self, payload: &[u8]) {
        let value: serde_json::Value = match serde_json::from_slice(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping undecodable stream frame");
                self.handler
                    .on_error(&WsError::InvalidParameter(format!("decode error: {e}")));
                return;
            }
        };
        let Some(tag) = value.get("e").and_then(|v| v.as_str()) else {
            warn!("stream frame missing 'e' field, dropping");
            return;
        };
        if tag != self.expected_tag {
            warn!(tag, expected = self.expected_tag, "unexpected event tag, dropping");
            return;
        }
        match serde_json::from_value::<StreamEvent>(value) {
            Ok(event) => self.handler.on_event(event),
            Err(e) => {
                warn!(error = %e, "dropping undecodable stream event");
                self.handler
                    .on_error(&WsError::InvalidParameter(format!("decode error: {e}")));
            }
        }
    }
}

/// Live subscriptions, keyed both by id (for unsubscribe) and by stream name
/// (to reject duplicate subscriptions to the same stream, spec §4.7/§3).
#[derive(Default)]
struct Subscriptions {
    by_id: HashMap<Uuid, (String, Arc<StreamConnection>)>,
    by_name: HashMap<String, Uuid>,
}

/// Owns many named subscriptions, each backed by its own §4.5 connection
/// (spec §4.7: one socket per stream).
pub struct MultiplexClient {
    base_url: String,
    max_reconnects: i64,
    subscriptions: Mutex<Subscriptions>,
}

impl MultiplexClient {
    pub fn new(base_url: impl Into<String>, max_reconnects: i64) -> Arc<Self> {
        Arc::new(MultiplexClient {
            base_url: base_url.into(),
            max_reconnects,
            subscriptions: Mutex::new(Subscriptions::default()),
        })
    }

    /// Claims `stream_name` for a new subscription, rejecting it if the
    /// name is already in use. Held until `commit` or `release_reservation`
    /// so a second subscribe racing the first dial also sees the name taken.
    fn reserve(&self, stream_name: &str) -> Result<Uuid, WsError> {
        let mut subs = self.subscriptions.lock().unwrap();
        if subs.by_name.contains_key(stream_name) {
            return Err(WsError::AlreadySubscribed(stream_name.to_string()));
        }
        let id = Uuid::new_v4();
        subs.by_name.insert(stream_name.to_string(), id);
        Ok(id)
    }

    fn release_reservation(&self, stream_name: &str) {
        self.subscriptions.lock().unwrap().by_name.remove(stream_name);
    }

    fn commit(&self, id: Uuid, stream_name: String, conn: Arc<StreamConnection>) {
        self.subscriptions.lock().unwrap().by_id.insert(id, (stream_name, conn));
    }

    async fn subscribe_raw(
        self: &Arc<Self>,
        stream_name: String,
        expected_tag: &'static str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let id = self.reserve(&stream_name)?;
        let url = format!("{}/ws/{}", self.base_url, stream_name);
        let callbacks = Arc::new(RoutingCallbacks {
            expected_tag,
            handler,
        });
        let conn = StreamConnection::new(stream_name.clone(), url, callbacks, self.max_reconnects);
        match conn.connect().await {
            Ok(()) => {
                self.commit(id, stream_name, conn);
                Ok(id)
            }
            Err(e) => {
                self.release_reservation(&stream_name);
                Err(e)
            }
        }
    }

    pub async fn subscribe_kline(
        self: &Arc<Self>,
        symbol: &str,
        interval: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = format!("{}@kline_{}", symbol.to_ascii_lowercase(), interval);
        self.subscribe_raw(stream_name, "kline", handler).await
    }

    pub async fn subscribe_agg_trade(
        self: &Arc<Self>,
        symbol: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = format!("{}@aggTrade", symbol.to_ascii_lowercase());
        self.subscribe_raw(stream_name, "aggTrade", handler).await
    }

    pub async fn subscribe_ticker(
        self: &Arc<Self>,
        symbol: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = format!("{}@ticker", symbol.to_ascii_lowercase());
        self.subscribe_raw(stream_name, "24hrTicker", handler).await
    }

    pub async fn subscribe_liquidation(
        self: &Arc<Self>,
        symbol: &str,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = format!("{}@forceOrder", symbol.to_ascii_lowercase());
        self.subscribe_raw(stream_name, "forceOrder", handler).await
    }

    pub async fn subscribe_depth(
        self: &Arc<Self>,
        symbol: &str,
        level: DepthLevel,
        speed: DepthSpeed,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = match speed.suffix() {
            Some(suffix) => format!(
                "{}@depth{}@{}",
                symbol.to_ascii_lowercase(),
                level.as_str(),
                suffix
            ),
            None => format!("{}@depth{}", symbol.to_ascii_lowercase(), level.as_str()),
        };
        self.subscribe_raw(stream_name, "depthUpdate", handler).await
    }

    pub async fn subscribe_diff_depth(
        self: &Arc<Self>,
        symbol: &str,
        speed: DepthSpeed,
        handler: Arc<dyn SubscriptionHandler>,
    ) -> Result<Uuid, WsError> {
        let stream_name = match speed.suffix() {
            Some(suffix) => format!("{}@depth@{}", symbol.to_ascii_lowercase(), suffix),
            None => format!("{}@depth", symbol.to_ascii_lowercase()),
        };
        self.subscribe_raw(stream_name, "depthUpdate", handler).await
    }

    pub async fn unsubscribe(&self, id: Uuid) -> Result<(), WsError> {
        let entry = {
            let mut subs = self.subscriptions.lock().unwrap();
            let entry = subs.by_id.remove(&id);
            if let Some((name, _)) = &entry {
                subs.by_name.remove(name);
            }
            entry
        };
        match entry {
            Some((_, conn)) => {
                conn.disconnect().await;
                Ok(())
            }
            None => Err(WsError::InvalidParameter(format!("unknown subscription: {id}"))),
        }
    }

    /// Disconnects all subscriptions and empties the map (spec §4.7 `Close()`).
    pub async fn close(&self) {
        let conns: Vec<_> = {
            let mut subs = self.subscriptions.lock().unwrap();
            subs.by_name.clear();
            subs.by_id.drain().map(|(_, (_, conn))| conn).collect()
        };
        for conn in conns {
            conn.disconnect().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_level_rejects_invalid_value() {
        assert!("7".parse::<DepthLevel>().is_err());
        assert_eq!("5".parse::<DepthLevel>().unwrap(), DepthLevel::L5);
    }

    #[test]
    fn depth_speed_rejects_invalid_value() {
        assert!("999ms".parse::<DepthSpeed>().is_err());
    }

    #[test]
    fn kline_stream_name_grammar() {
        assert_eq!(
            format!("{}@kline_{}", "btcusdt", "1m"),
            "btcusdt@kline_1m"
        );
    }

    #[test]
    fn reserve_rejects_duplicate_stream_name() {
        let client = MultiplexClient::new("wss://example.invalid", 1);
        client.reserve("btcusdt@aggTrade").unwrap();
        let err = client.reserve("btcusdt@aggTrade").unwrap_err();
        assert!(matches!(err, WsError::AlreadySubscribed(ref name) if name == "btcusdt@aggTrade"));
    }

    #[test]
    fn release_reservation_frees_the_name_for_reuse() {
        let client = MultiplexClient::new("wss://example.invalid", 1);
        let id = client.reserve("btcusdt@aggTrade").unwrap();
        client.release_reservation("btcusdt@aggTrade");
        let id2 = client.reserve("btcusdt@aggTrade").unwrap();
        assert_ne!(id, id2);
    }
}

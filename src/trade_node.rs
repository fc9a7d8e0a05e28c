//! Trade node (spec §4.8): resolves an exchange adapter, subscribes to its
//! native trade stream via the multiplex client, normalizes trades onto the
//! canonical model, and emits them on the bus.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex as AsyncMutex;
use tracing::warn;

use crate::adapters::AdapterRegistry;
use crate::bus::EventBus;
use crate::error::{ErrorCode, NodeError};
use crate::model::{Exchange, Instrument, Symbol, Trade};
use crate::node::{build_metadata_response, BaseNode, IdRequest, MetadataResponse, Node};
use crate::ws::multiplex::MultiplexClient;

#[derive(Debug, Clone, Deserialize)]
pub struct TradeNodeParams {
    pub exchange: String,
    pub instrument: String,
    pub symbol: String,
}

#[derive(Default)]
struct Counters {
    current_id: i64,
    n_connected: i64,
    n_reconnected: i64,
    n_error: i64,
}

/// Trade node (spec §3, §4.8). Routing tables live on `base` and are
/// resolved into concrete subjects in `start`, so a missing `rpc`/`emit`
/// entry in the node's configuration is fatal to `start`, per spec.
pub struct TradeNode {
    base: BaseNode,
    params: TradeNodeParams,
    bus: Arc<EventBus>,
    client: Arc<MultiplexClient>,
    counters: Arc<std::sync::Mutex<Counters>>,
    subscription_id: AsyncMutex<Option<uuid::Uuid>>,
}

impl TradeNode {
    pub fn new(
        params: TradeNodeParams,
        bus: Arc<EventBus>,
        client: Arc<MultiplexClient>,
        base: BaseNode,
    ) -> Arc<Self> {
        Arc::new(TradeNode {
            base,
            params,
            bus,
            client,
            counters: Arc::new(std::sync::Mutex::new(Counters::default())),
            subscription_id: AsyncMutex::new(None),
        })
    }
}

#[derive(Debug, Serialize)]
struct ParametersResponse {
    id: i64,
    code: ErrorCode,
    parameters: String,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: i64,
    code: ErrorCode,
    current_id: i64,
    n_connected: i64,
    n_reconnected: i64,
    n_error: i64,
}

#[async_trait]
impl Node for TradeNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    async fn start(&self) -> Result<(), NodeError> {
        let exchange: Exchange = self
            .params
            .exchange
            .parse()
            .map_err(NodeError::InvalidConfig)?;
        let instrument: Instrument = self
            .params
            .instrument
            .parse()
            .map_err(NodeError::InvalidConfig)?;
        let symbol = Symbol::parse(&self.params.symbol).map_err(NodeError::InvalidConfig)?;

        let adapter = AdapterRegistry::global().resolve(exchange, instrument)?;

        let emit_trade_subject = self.base.get_emit("emit_trade")?.to_string();
        let req_metadata_subject = self.base.get_rpc("req_metadata")?.to_string();
        let req_parameters_subject = self.base.get_rpc("req_parameters")?.to_string();
        let req_status_subject = self.base.get_rpc("req_status")?.to_string();

        let bus = self.bus.clone();
        let emit_subject = emit_trade_subject.clone();
        let counters = self.counters.clone();
        let on_trade: Arc<dyn Fn(Trade) + Send + Sync> = Arc::new(move |mut trade: Trade| {
            {
                let mut c = counters.lock().unwrap();
                c.current_id += 1;
                trade.id = c.current_id;
            }
            let bus = bus.clone();
            let subject = emit_subject.clone();
            tokio::spawn(async move {
                if let Err(e) = bus.emit(&subject, &trade).await {
                    warn!(error = %e, "failed to emit trade");
                }
            });
        });

        let error_counters = self.counters.clone();
        let on_error: Arc<dyn Fn(String) + Send + Sync> = Arc::new(move |msg: String| {
            error_counters.lock().unwrap().n_error += 1;
            warn!(error = %msg, "trade adapter error");
        });

        let sub_id = adapter.subscribe(&self.client, &symbol, on_trade, on_error).await?;
        *self.subscription_id.lock().await = Some(sub_id);
        self.counters.lock().unwrap().n_connected += 1;

        let created_at = self.base.created_at;
        let emit_map = self.base.emit.clone();
        let on_map = self.base.on.clone();
        let rpc_map = self.base.rpc.clone();
        self.bus
            .register_rpc::<IdRequest, MetadataResponse, _>(&req_metadata_subject, move |req| {
                Ok(build_metadata_response(
                    req.id,
                    created_at,
                    emit_map.clone(),
                    on_map.clone(),
                    rpc_map.clone(),
                ))
            })
            .await
            .map_err(NodeError::Bus)?;

        let params_json = json!({
            "exchange": self.params.exchange,
            "instrument": self.params.instrument,
            "symbol": self.params.symbol,
        })
        .to_string();
        self.bus
            .register_rpc::<IdRequest, ParametersResponse, _>(&req_parameters_subject, move |req| {
                Ok(ParametersResponse {
                    id: req.id,
                    code: ErrorCode::Ok,
                    parameters: params_json.clone(),
                })
            })
            .await
            .map_err(NodeError::Bus)?;

        let status_counters = self.counters.clone();
        self.bus
            .register_rpc::<IdRequest, StatusResponse, _>(&req_status_subject, move |req| {
                let c = status_counters.lock().unwrap();
                Ok(StatusResponse {
                    id: req.id,
                    code: ErrorCode::Ok,
                    current_id: c.current_id,
                    n_connected: c.n_connected,
                    n_reconnected: c.n_reconnected,
                    n_error: c.n_error,
                })
            })
            .await
            .map_err(NodeError::Bus)?;

        Ok(())
    }

    async fn stop(&self) -> Result<(), NodeError> {
        if let Some(id) = self.subscription_id.lock().await.take() {
            self.client
                .unsubscribe(id)
                .await
                .map_err(|e| NodeError::InvalidConfig(e.to_string()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_parse_from_yaml_shaped_json() {
        let params: TradeNodeParams = serde_json::from_value(json!({
            "exchange": "BINANCE",
            "instrument": "SPOT",
            "symbol": "BTC-USDT",
        }))
        .unwrap();
        assert_eq!(params.exchange, "BINANCE");
        assert_eq!(params.symbol, "BTC-USDT");
    }

    #[tokio::test]
    async fn start_fails_fast_when_a_required_rpc_subject_is_unconfigured() {
        use crate::pubsub::InProcessPubSub;
        use std::collections::HashMap;

        crate::bootstrap::register_adapters();
        let bus = Arc::new(EventBus::new(Arc::new(InProcessPubSub::new())));
        let client = MultiplexClient::new("wss://example.invalid", 1);
        let params = TradeNodeParams {
            exchange: "BINANCE".to_string(),
            instrument: "SPOT".to_string(),
            symbol: "BTC-USDT".to_string(),
        };
        let mut emit = HashMap::new();
        emit.insert("emit_trade".to_string(), "sub.emit_trade".to_string());
        // rpc table intentionally left empty: req_metadata is never configured.
        let base = BaseNode::new("n1", "trade", HashMap::new(), emit, HashMap::new());
        let node = TradeNode::new(params, bus, client, base);

        let err = node.start().await.unwrap_err();
        assert!(matches!(err, NodeError::KeyNotFound(ref key) if key == "req_metadata"));
    }
}

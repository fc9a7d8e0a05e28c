//! Exchange adapter registry (spec §4.8 step 2): maps `(exchange, instrument)`
//! to the collaborator that knows how to subscribe to and decode that
//! exchange's native trade stream.

pub mod binance;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use async_trait::async_trait;

use crate::error::NodeError;
use crate::model::{Exchange, Instrument, Symbol, Trade};
use crate::ws::multiplex::MultiplexClient;

/// Decodes one exchange's native trade stream into the canonical `Trade`
/// model and drives the subscription that feeds it.
#[async_trait]
pub trait TradeAdapter: Send + Sync {
    fn exchange(&self) -> Exchange;
    fn instrument(&self) -> Instrument;

    /// Subscribes to the trade stream for `symbol` on `client`, delivering
    /// each decoded `Trade` to `on_trade`. Returns a subscription id string
    /// usable with `unsubscribe`. Takes the already-parsed `Symbol` rather
    /// than a raw string, since the exchange-native wire form (e.g.
    /// Binance's concatenated `BTCUSDT`) is the adapter's own business.
    async fn subscribe(
        &self,
        client: &Arc<MultiplexClient>,
        symbol: &Symbol,
        on_trade: Arc<dyn Fn(Trade) + Send + Sync>,
        on_error: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<uuid::Uuid, NodeError>;
}

/// Process-wide `(exchange, instrument) -> adapter` registry (spec §4.8).
pub struct AdapterRegistry {
    adapters: RwLock<HashMap<(Exchange, Instrument), Arc<dyn TradeAdapter>>>,
}

impl AdapterRegistry {
    fn new() -> Self {
        AdapterRegistry {
            adapters: RwLock::new(HashMap::new()),
        }
    }

    pub fn global() -> &'static AdapterRegistry {
        static REGISTRY: OnceLock<AdapterRegistry> = OnceLock::new();
        REGISTRY.get_or_init(AdapterRegistry::new)
    }

    pub fn register(&self, adapter: Arc<dyn TradeAdapter>) {
        self.adapters
            .write()
            .unwrap()
            .insert((adapter.exchange(), adapter.instrument()), adapter);
    }

    pub fn resolve(&self, exchange: Exchange, instrument: Instrument) -> Result<Arc<dyn TradeAdapter>, NodeError> {
        self.adapters
            .read()
            .unwrap()
            .get(&(exchange, instrument))
            .cloned()
            .ok_or_else(|| NodeError::AdapterNotFound {
                exchange: exchange.as_str().to_string(),
                instrument: format!("{instrument:?}"),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_missing_adapter_is_adapter_not_found() {
        let registry = AdapterRegistry::new();
        let result = registry.resolve(Exchange::Okx, Instrument::Perpetual);
        assert!(matches!(result, Err(NodeError::AdapterNotFound { .. })));
    }
}

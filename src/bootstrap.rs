//! Central bootstrap: explicit `register_*` calls, never static-initializer
//! side effects (spec §9).

use std::sync::Arc;

use crate::adapters::binance::BinanceSpotAdapter;
use crate::adapters::AdapterRegistry;
use crate::bar_node::{BarNodeParams, TimeBarNode};
use crate::bus::EventBus;
use crate::error::NodeError;
use crate::model::{Exchange, Instrument};
use crate::node::{BaseNode, Node, NodeConfig};
use crate::registry::NodeRegistry;
use crate::trade_node::{TradeNode, TradeNodeParams};
use crate::ws::multiplex::MultiplexClient;

/// Registers every built-in exchange adapter. Call once at process start.
pub fn register_adapters() {
    AdapterRegistry::global().register(Arc::new(BinanceSpotAdapter));
}

/// Registers every built-in node type constructor, closing over the
/// multiplex client the trade node subscribes through. Call once at
/// process start, after `register_adapters`.
pub fn register_node_types(client: Arc<MultiplexClient>) -> Result<(), NodeError> {
    let registry = NodeRegistry::global();

    registry.register("time_bar", |config: NodeConfig, bus: Arc<EventBus>| {
        let params: BarNodeParams = serde_yaml::from_value(config.params.clone())
            .map_err(|e| NodeError::InvalidConfig(e.to_string()))?;
        let base = BaseNode::from_config(&config);
        Ok(TimeBarNode::new(params, bus, base) as Arc<dyn Node>)
    })?;

    registry.register("trade", move |config: NodeConfig, bus: Arc<EventBus>| {
        let params: TradeNodeParams = serde_yaml::from_value(config.params.clone())
            .map_err(|e| NodeError::InvalidConfig(e.to_string()))?;
        let base = BaseNode::from_config(&config);
        Ok(TradeNode::new(params, bus, client.clone(), base) as Arc<dyn Node>)
    })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_adapters_resolves_binance_spot() {
        register_adapters();
        AdapterRegistry::global()
            .resolve(Exchange::Binance, Instrument::Spot)
            .unwrap();
    }
}

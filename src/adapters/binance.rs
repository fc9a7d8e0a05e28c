//! Binance spot/perpetual trade adapter (spec §4.8): translates the
//! exchange-native agg-trade stream into canonical `Trade` events.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::{NodeError, WsError};
use crate::model::{Exchange, Instrument, Side, Symbol, Trade};
use crate::ws::multiplex::{MultiplexClient, StreamEvent, SubscriptionHandler};

use super::TradeAdapter;

struct AggTradeHandler {
    symbol: Symbol,
    instrument: Instrument,
    next_id: AtomicI64,
    on_trade: Arc<dyn Fn(Trade) + Send + Sync>,
    on_error: Arc<dyn Fn(String) + Send + Sync>,
}

impl SubscriptionHandler for AggTradeHandler {
    fn on_error(&self, err: &WsError) {
        (self.on_error)(err.to_string());
    }

    fn on_event(&self, event: StreamEvent) {
        let StreamEvent::AggTrade(agg) = event else {
            return;
        };
        let (price, quantity) = match (agg.price.parse::<f64>(), agg.quantity.parse::<f64>()) {
            (Ok(p), Ok(q)) => (p, q),
            _ => {
                (self.on_error)(format!(
                    "failed to parse numeric fields in agg trade: price={} quantity={}",
                    agg.price, agg.quantity
                ));
                return;
            }
        };
        let taker_side = if agg.is_buyer_maker { Side::Sell } else { Side::Buy };
        let trade = Trade {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            exchange: Exchange::Binance,
            instrument: self.instrument,
            symbol: self.symbol.clone(),
            price,
            quantity,
            taker_side,
            timestamp: agg.trade_time,
        };
        (self.on_trade)(trade);
    }
}

pub struct BinanceSpotAdapter;

#[async_trait]
impl TradeAdapter for BinanceSpotAdapter {
    fn exchange(&self) -> Exchange {
        Exchange::Binance
    }

    fn instrument(&self) -> Instrument {
        Instrument::Spot
    }

    async fn subscribe(
        &self,
        client: &Arc<MultiplexClient>,
        symbol: &Symbol,
        on_trade: Arc<dyn Fn(Trade) + Send + Sync>,
        on_error: Arc<dyn Fn(String) + Send + Sync>,
    ) -> Result<Uuid, NodeError> {
        let handler = Arc::new(AggTradeHandler {
            symbol: symbol.clone(),
            instrument: Instrument::Spot,
            next_id: AtomicI64::new(1),
            on_trade,
            on_error,
        });
        client
            .subscribe_agg_trade(&symbol.concatenated(), handler)
            .await
            .map_err(|e| NodeError::InvalidConfig(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buyer_maker_true_means_taker_is_seller() {
        let is_buyer_maker = true;
        let side = if is_buyer_maker { Side::Sell } else { Side::Buy };
        assert_eq!(side, Side::Sell);
    }
}

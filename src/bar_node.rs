//! Time-bar aggregation node (spec §4.9): buckets a trade stream by a
//! fixed interval and emits OHLC + quantile summary bars. Quantile
//! computation follows the teacher's `orderbook::analytics::profile`
//! sort-then-index percentile style, adapted from `Decimal` histogram bins
//! to plain `f64` arithmetic.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::bus::EventBus;
use crate::error::{ErrorCode, NodeError};
use crate::model::{Bar, Exchange, Instrument, Symbol, Trade};
use crate::node::{BaseNode, IdRequest, Node};

#[derive(Debug, Clone, Deserialize)]
pub struct BarNodeParams {
    pub interval: i64,
    pub exchange: Exchange,
    pub instrument: Instrument,
    pub symbol: Symbol,
}

struct State {
    is_first_bar: bool,
    current_bucket: i64,
    trade_buffer: Vec<Trade>,
}

/// Subscribes to `Trade` events, buckets them by `interval`, emits `Bar`
/// events with OHLC + summary statistics (spec §4.9). Symbol/instrument/
/// exchange come from `params`, same as the other fields this node is
/// configured with (spec §6 node config schema). Subjects are resolved from
/// `base`'s routing tables in `start`, not baked in at construction.
pub struct TimeBarNode {
    base: BaseNode,
    params: BarNodeParams,
    bus: Arc<EventBus>,
    state: Arc<Mutex<State>>,
}

impl TimeBarNode {
    pub fn new(params: BarNodeParams, bus: Arc<EventBus>, base: BaseNode) -> Arc<Self> {
        Arc::new(TimeBarNode {
            base,
            params,
            bus,
            state: Arc::new(Mutex::new(State {
                is_first_bar: true,
                current_bucket: 0,
                trade_buffer: Vec::new(),
            })),
        })
    }

    /// Feeds one trade into the bucketing state machine (spec §4.9),
    /// returning a completed `Bar` when a boundary is crossed and the prior
    /// bucket wasn't the priming bucket.
    fn ingest(state: &mut State, interval: i64, symbol: &Symbol, instrument: Instrument, exchange: Exchange, t: Trade) -> Option<Bar> {
        let bucket = t.timestamp.div_euclid(interval);

        if state.current_bucket == 0 {
            state.current_bucket = bucket;
            return None;
        }
        if bucket == state.current_bucket {
            state.trade_buffer.push(t);
            return None;
        }

        let bar = compute_bar(&state.trade_buffer, &t, symbol, instrument, exchange);
        state.trade_buffer.clear();
        state.current_bucket = bucket;

        if state.is_first_bar {
            state.is_first_bar = false;
            None
        } else {
            bar
        }
    }
}

fn compute_bar(buffer: &[Trade], next: &Trade, symbol: &Symbol, instrument: Instrument, exchange: Exchange) -> Option<Bar> {
    if buffer.is_empty() {
        return None;
    }
    let n = buffer.len();
    let open = buffer[0].price;
    let close = buffer[n - 1].price;
    let high = buffer.iter().map(|t| t.price).fold(f64::MIN, f64::max);
    let low = buffer.iter().map(|t| t.price).fold(f64::MAX, f64::min);

    let mean = buffer.iter().map(|t| t.price).sum::<f64>() / n as f64;
    let std = if n < 2 {
        0.0
    } else {
        let variance = buffer.iter().map(|t| (t.price - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
        variance.sqrt()
    };

    let mut sorted: Vec<f64> = buffer.iter().map(|t| t.price).collect();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = quantile(&sorted, 0.5);
    let q1 = quantile(&sorted, 0.25);
    let q3 = quantile(&sorted, 0.75);

    let volume_base: f64 = buffer.iter().map(|t| t.quantity).sum();
    let volume_quote: f64 = buffer.iter().map(|t| t.price * t.quantity).sum();

    Some(Bar {
        symbol: symbol.clone(),
        instrument,
        exchange,
        start_seq: buffer[0].id,
        end_seq: buffer[n - 1].id,
        next_seq: next.id,
        start_time: buffer[0].timestamp,
        end_time: next.timestamp,
        open,
        high,
        low,
        close,
        mean,
        std,
        median,
        q1,
        q3,
        volume_base,
        volume_quote,
        count: n as i64,
    })
}

/// Empirical quantile on a sorted slice via linear interpolation between
/// order statistics.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.len() == 1 {
        return sorted[0];
    }
    let pos = q * (sorted.len() - 1) as f64;
    let lower = pos.floor() as usize;
    let upper = pos.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let frac = pos - lower as f64;
        sorted[lower] * (1.0 - frac) + sorted[upper] * frac
    }
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    id: i64,
    code: ErrorCode,
    is_first_bar: bool,
    current_open_time: i64,
    trade_buffer_length: usize,
}

#[derive(Debug, Serialize)]
struct ParametersResponse {
    id: i64,
    code: ErrorCode,
    parameters: String,
}

#[async_trait]
impl Node for TimeBarNode {
    fn base(&self) -> &BaseNode {
        &self.base
    }

    async fn start(&self) -> Result<(), NodeError> {
        let on_subject = self.base.get_on("on_trade")?.to_string();
        let emit_subject = self.base.get_emit("emit_bar")?.to_string();
        let req_parameters_subject = self.base.get_rpc("req_parameters")?.to_string();
        let req_status_subject = self.base.get_rpc("req_status")?.to_string();

        let interval = self.params.interval;
        let symbol = self.params.symbol.clone();
        let instrument = self.params.instrument;
        let exchange = self.params.exchange;
        let bus = self.bus.clone();

        // `on` requires a 'static handler, so move the shared Arc<Mutex<State>>
        // into the closure instead of borrowing `self`.
        let shared_state = self.state.clone();

        let bus_for_handler = bus.clone();
        let emit_subject_for_handler = emit_subject.clone();
        self.bus
            .on::<Trade, _>(&on_subject, move |trade| {
                let bar = {
                    let mut s = shared_state.lock().unwrap();
                    TimeBarNode::ingest(&mut s, interval, &symbol, instrument, exchange, trade)
                };
                if let Some(bar) = bar {
                    let bus = bus_for_handler.clone();
                    let subject = emit_subject_for_handler.clone();
                    tokio::spawn(async move {
                        if let Err(e) = bus.emit(&subject, &bar).await {
                            warn!(error = %e, "failed to emit bar");
                        }
                    });
                }
            })
            .await
            .map_err(NodeError::Bus)?;

        let interval_for_params = self.params.interval;
        self.bus
            .register_rpc::<IdRequest, ParametersResponse, _>(&req_parameters_subject, move |req| {
                Ok(ParametersResponse {
                    id: req.id,
                    code: ErrorCode::Ok,
                    parameters: json!({ "interval": interval_for_params }).to_string(),
                })
            })
            .await
            .map_err(NodeError::Bus)?;

        let status_state = self.state.clone();
        let status_interval = self.params.interval;
        self.bus
            .register_rpc::<IdRequest, StatusResponse, _>(&req_status_subject, move |req| {
                let s = status_state.lock().unwrap();
                Ok(StatusResponse {
                    id: req.id,
                    code: ErrorCode::Ok,
                    is_first_bar: s.is_first_bar,
                    current_open_time: s.current_bucket * status_interval,
                    trade_buffer_length: s.trade_buffer.len(),
                })
            })
            .await
            .map_err(NodeError::Bus)?;

        Ok(())
    }

    async fn stop(&self) -> Result<(), NodeError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Exchange, Instrument, Side};

    fn trade(id: i64, ts: i64, price: f64, quantity: f64) -> Trade {
        Trade {
            id,
            exchange: Exchange::Binance,
            instrument: Instrument::Spot,
            symbol: Symbol { base: "BTC".into(), quote: "USDT".into() },
            price,
            quantity,
            taker_side: Side::Buy,
            timestamp: ts,
        }
    }

    fn symbol() -> Symbol {
        Symbol { base: "BTC".into(), quote: "USDT".into() }
    }

    #[test]
    fn two_trades_same_bucket_no_emission() {
        let mut state = State { is_first_bar: true, current_bucket: 0, trade_buffer: Vec::new() };
        let sym = symbol();
        let b1 = TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(1, 500, 10.0, 1.0));
        assert!(b1.is_none());
        let b2 = TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(2, 900, 12.0, 2.0));
        assert!(b2.is_none());
        assert_eq!(state.trade_buffer.len(), 2);
    }

    #[test]
    fn bucket_rollover_first_bar_skipped() {
        let mut state = State { is_first_bar: true, current_bucket: 0, trade_buffer: Vec::new() };
        let sym = symbol();
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(1, 500, 10.0, 1.0));
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(2, 900, 12.0, 2.0));
        let bar = TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(3, 1500, 11.0, 1.0));
        assert!(bar.is_none());
        assert_eq!(state.current_bucket, 1);
        assert!(state.trade_buffer.is_empty());
    }

    #[test]
    fn second_rollover_emits_bar() {
        let mut state = State { is_first_bar: true, current_bucket: 0, trade_buffer: Vec::new() };
        let sym = symbol();
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(1, 500, 10.0, 1.0));
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(2, 900, 12.0, 2.0));
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(3, 1500, 11.0, 1.0));
        TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(4, 1600, 13.0, 1.0));
        let bar = TimeBarNode::ingest(&mut state, 1000, &sym, Instrument::Spot, Exchange::Binance, trade(5, 2100, 9.0, 2.0)).unwrap();

        assert_eq!(bar.start_seq, 4);
        assert_eq!(bar.end_seq, 4);
        assert_eq!(bar.next_seq, 5);
        assert_eq!(bar.start_time, 1600);
        assert_eq!(bar.end_time, 2100);
        assert_eq!(bar.open, 13.0);
        assert_eq!(bar.high, 13.0);
        assert_eq!(bar.low, 13.0);
        assert_eq!(bar.close, 13.0);
        assert_eq!(bar.mean, 13.0);
        assert_eq!(bar.std, 0.0);
        assert_eq!(bar.median, 13.0);
        assert_eq!(bar.q1, 13.0);
        assert_eq!(bar.q3, 13.0);
        assert_eq!(bar.volume_base, 1.0);
        assert_eq!(bar.volume_quote, 13.0);
        assert_eq!(bar.count, 1);
    }

    #[test]
    fn single_trade_bar_has_zero_spread_stats() {
        let bar = compute_bar(&[trade(10, 100, 50.0, 2.0)], &trade(11, 200, 51.0, 1.0), &symbol(), Instrument::Spot, Exchange::Binance).unwrap();
        assert_eq!(bar.std, 0.0);
        assert_eq!(bar.q1, bar.median);
        assert_eq!(bar.median, bar.q3);
        assert_eq!(bar.open, bar.close);
        assert_eq!(bar.high, bar.low);
    }

    fn test_base() -> BaseNode {
        let mut on = std::collections::HashMap::new();
        on.insert("on_trade".to_string(), "on_trade".to_string());
        let mut emit = std::collections::HashMap::new();
        emit.insert("emit_bar".to_string(), "emit_bar".to_string());
        let mut rpc = std::collections::HashMap::new();
        rpc.insert("req_parameters".to_string(), "req_parameters".to_string());
        rpc.insert("req_status".to_string(), "req_status".to_string());
        BaseNode::new("bar1", "time_bar", on, emit, rpc)
    }

    #[tokio::test]
    async fn emitted_bar_carries_symbol_exchange_instrument_from_params() {
        use crate::bus::EventBus;
        use crate::node::Node;
        use crate::pubsub::InProcessPubSub;
        use std::sync::Arc;

        let bus = Arc::new(EventBus::new(Arc::new(InProcessPubSub::new())));
        let params = BarNodeParams {
            interval: 1000,
            exchange: Exchange::Okx,
            instrument: Instrument::Perpetual,
            symbol: Symbol { base: "ETH".into(), quote: "USDT".into() },
        };
        let node = TimeBarNode::new(params, bus.clone(), test_base());
        node.start().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<Bar>();
        bus.on::<Bar, _>("emit_bar", move |bar| {
            let _ = tx.send(bar);
        })
        .await
        .unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        for t in [
            trade(1, 500, 10.0, 1.0),
            trade(2, 900, 12.0, 2.0),
            trade(3, 1500, 11.0, 1.0),
            trade(4, 1600, 13.0, 1.0),
            trade(5, 2100, 9.0, 2.0),
        ] {
            bus.emit("on_trade", &t).await.unwrap();
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        let bar = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bar.exchange, Exchange::Okx);
        assert_eq!(bar.instrument, Instrument::Perpetual);
        assert_eq!(bar.symbol, Symbol { base: "ETH".into(), quote: "USDT".into() });
    }
}

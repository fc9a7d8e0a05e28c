//! Wire-level data model shared across nodes (spec §3).
//!
//! These types travel over the event bus, so every one of them derives
//! `Serialize`/`Deserialize` the way the teacher's stream payloads
//! (`TickerUpdate`, `DepthUpdate`, `UserDataEvent`) do.

use serde::{Deserialize, Serialize};

/// Exchange a trade or subscription originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    Binance,
    Bybit,
    Okx,
}

impl Exchange {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exchange::Binance => "BINANCE",
            Exchange::Bybit => "BYBIT",
            Exchange::Okx => "OKX",
        }
    }
}

impl std::str::FromStr for Exchange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "BINANCE" => Ok(Exchange::Binance),
            "BYBIT" => Ok(Exchange::Bybit),
            "OKX" => Ok(Exchange::Okx),
            other => Err(format!("unknown exchange: {other}")),
        }
    }
}

/// Instrument kind traded on an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Instrument {
    Spot,
    Perpetual,
}

impl std::str::FromStr for Instrument {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SPOT" => Ok(Instrument::Spot),
            "PERPETUAL" | "PERP" => Ok(Instrument::Perpetual),
            other => Err(format!("unknown instrument: {other}")),
        }
    }
}

/// Base/quote pair, e.g. `BTC-USDT` parses into `{base: "BTC", quote: "USDT"}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub base: String,
    pub quote: String,
}

impl Symbol {
    /// Parses the `"BASE-QUOTE"` configuration grammar from spec §4.8.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let (base, quote) = raw
            .split_once('-')
            .ok_or_else(|| format!("malformed symbol (expected BASE-QUOTE): {raw}"))?;
        if base.is_empty() || quote.is_empty() {
            return Err(format!("malformed symbol (expected BASE-QUOTE): {raw}"));
        }
        Ok(Symbol {
            base: base.to_ascii_uppercase(),
            quote: quote.to_ascii_uppercase(),
        })
    }

    /// Exchange-native concatenated form, e.g. `BTCUSDT`.
    pub fn concatenated(&self) -> String {
        format!("{}{}", self.base, self.quote)
    }
}

/// Taker side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

/// Canonical trade event (spec §3 "Trade event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: i64,
    pub exchange: Exchange,
    pub instrument: Instrument,
    pub symbol: Symbol,
    pub price: f64,
    pub quantity: f64,
    pub taker_side: Side,
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
}

/// OHLC summary bar (spec §3 "Bar event").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: Symbol,
    pub instrument: Instrument,
    pub exchange: Exchange,

    pub start_seq: i64,
    pub end_seq: i64,
    pub next_seq: i64,

    pub start_time: i64,
    pub end_time: i64,

    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,

    pub mean: f64,
    pub std: f64,
    pub median: f64,
    pub q1: f64,
    pub q3: f64,

    pub volume_base: f64,
    pub volume_quote: f64,
    pub count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_base_quote_symbol() {
        let s = Symbol::parse("btc-usdt").unwrap();
        assert_eq!(s.base, "BTC");
        assert_eq!(s.quote, "USDT");
        assert_eq!(s.concatenated(), "BTCUSDT");
    }

    #[test]
    fn rejects_malformed_symbol() {
        assert!(Symbol::parse("btcusdt").is_err());
        assert!(Symbol::parse("-usdt").is_err());
    }

    #[test]
    fn exchange_round_trips_through_str() {
        assert_eq!("BINANCE".parse::<Exchange>().unwrap(), Exchange::Binance);
        assert!("NOTANEXCHANGE".parse::<Exchange>().is_err());
    }
}

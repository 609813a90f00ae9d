//! Typed market events decoded from stream frames.

use crate::{Candle, Interval, Price, Size, Symbol};
use rust_decimal::Decimal;
use serde::Serialize;

/// Kline (candle) update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KlineEvent {
    pub symbol: Symbol,
    pub interval: Interval,
    pub candle: Candle,
    /// Whether this candle is final.
    pub is_closed: bool,
    /// Exchange event time (ms).
    pub event_time: i64,
}

/// Rolling 24h ticker statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TickerEvent {
    pub symbol: Symbol,
    pub last: Price,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub volume: Size,
    pub quote_volume: Decimal,
    pub price_change: Decimal,
    pub price_change_percent: Decimal,
    pub event_time: i64,
}

/// Single trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TradeEvent {
    pub symbol: Symbol,
    pub trade_id: u64,
    pub price: Price,
    pub quantity: Size,
    pub trade_time: i64,
    pub is_buyer_maker: bool,
    pub event_time: i64,
}

/// One `[price, quantity]` order-book level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PriceLevel {
    pub price: Price,
    pub quantity: Size,
}

/// Incremental order-book update.
///
/// A level with zero quantity removes that price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DepthDelta {
    pub symbol: Symbol,
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub bids: Vec<PriceLevel>,
    pub asks: Vec<PriceLevel>,
    pub event_time: i64,
}

/// Parsed market data event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum MarketEvent {
    Kline(KlineEvent),
    Ticker(TickerEvent),
    Trade(TradeEvent),
    Depth(DepthDelta),
}

impl MarketEvent {
    pub fn symbol(&self) -> &Symbol {
        match self {
            Self::Kline(e) => &e.symbol,
            Self::Ticker(e) => &e.symbol,
            Self::Trade(e) => &e.symbol,
            Self::Depth(e) => &e.symbol,
        }
    }

    /// Exchange event time (ms).
    pub fn event_time(&self) -> i64 {
        match self {
            Self::Kline(e) => e.event_time,
            Self::Ticker(e) => e.event_time,
            Self::Trade(e) => e.event_time,
            Self::Depth(e) => e.event_time,
        }
    }

    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kline(_) => "kline",
            Self::Ticker(_) => "ticker",
            Self::Trade(_) => "trade",
            Self::Depth(_) => "depth",
        }
    }

    pub fn as_kline(&self) -> Option<&KlineEvent> {
        match self {
            Self::Kline(e) => Some(e),
            _ => None,
        }
    }
}

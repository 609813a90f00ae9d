//! Candle type.

use crate::{Price, Size};
use serde::{Deserialize, Serialize};

/// One OHLCV candle.
///
/// `time` is the candle open time in Unix seconds. Within a series there is
/// at most one candle per `time`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub time: i64,
    pub open: Price,
    pub high: Price,
    pub low: Price,
    pub close: Price,
    pub volume: Size,
}

impl Candle {
    pub fn new(time: i64, open: Price, high: Price, low: Price, close: Price, volume: Size) -> Self {
        Self {
            time,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// Convert an exchange millisecond open time to candle seconds.
    #[inline]
    pub fn time_from_millis(open_time_ms: i64) -> i64 {
        open_time_ms.div_euclid(1000)
    }
}

/// Sort by `time` and collapse duplicate times, keeping the later candle.
pub fn normalize_candles(mut candles: Vec<Candle>) -> Vec<Candle> {
    candles.sort_by_key(|c| c.time);
    let mut out: Vec<Candle> = Vec::with_capacity(candles.len());
    for candle in candles {
        match out.last_mut() {
            Some(last) if last.time == candle.time => *last = candle,
            _ => out.push(candle),
        }
    }
    out
}

//! Ordered candle series.
//!
//! Sorted ascending by `time` with at most one candle per `time`. An update
//! for the last candle's `time` replaces it, a newer one appends, and an
//! older one is ignored.

use serde::Serialize;
use tickstream_core::{normalize_candles, Candle};

/// Effect of folding one candle into the series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyOutcome {
    /// In-progress candle updated in place.
    Replaced,
    /// A new candle started.
    Appended,
    /// Older than the last candle.
    Ignored,
}

#[derive(Debug, Clone, Default)]
pub struct CandleSeries {
    candles: Vec<Candle>,
    /// Oldest candles are dropped beyond this length.
    max_len: Option<usize>,
}

impl CandleSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            candles: Vec::new(),
            max_len: Some(max_len.max(1)),
        }
    }

    /// Fold one candle.
    pub fn apply(&mut self, candle: Candle) -> ApplyOutcome {
        let outcome = match self.candles.last_mut() {
            Some(last) if candle.time == last.time => {
                *last = candle;
                ApplyOutcome::Replaced
            }
            Some(last) if candle.time < last.time => ApplyOutcome::Ignored,
            _ => {
                self.candles.push(candle);
                ApplyOutcome::Appended
            }
        };
        self.enforce_max_len();
        outcome
    }

    /// Replace the whole series with `snapshot`.
    ///
    /// Candles already held that are newer than the snapshot's last candle
    /// are kept, so a snapshot that lags the live stream loses nothing.
    pub fn merge_snapshot(&mut self, snapshot: Vec<Candle>) {
        let mut fresh = normalize_candles(snapshot);
        if let Some(last) = fresh.last().map(|c| c.time) {
            fresh.extend(self.candles.iter().filter(|c| c.time > last).copied());
            self.candles = fresh;
        } else if self.candles.is_empty() {
            self.candles = fresh;
        }
        self.enforce_max_len();
    }

    pub fn clear(&mut self) {
        self.candles.clear();
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn enforce_max_len(&mut self) {
        if let Some(max) = self.max_len {
            if self.candles.len() > max {
                let excess = self.candles.len() - max;
                self.candles.drain(..excess);
            }
        }
    }
}

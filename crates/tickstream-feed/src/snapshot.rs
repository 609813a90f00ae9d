//! Historical candle source.

use crate::error::{FeedError, FeedResult};
use async_trait::async_trait;
use tickstream_core::{Candle, Interval, Symbol};
use tickstream_rest::MarketDataClient;

/// Bounded point query for historical candles, oldest first.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource: Send + Sync + 'static {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> FeedResult<Vec<Candle>>;
}

#[async_trait]
impl SnapshotSource for MarketDataClient {
    async fn fetch_candles(
        &self,
        symbol: &Symbol,
        interval: Interval,
        limit: u32,
    ) -> FeedResult<Vec<Candle>> {
        self.fetch_klines(symbol, interval, limit)
            .await
            .map_err(|e| FeedError::SnapshotFetch(e.to_string()))
    }
}

//! Realtime candle aggregation.
//!
//! A [`RealtimeAggregator`] seeds a [`CandleSeries`] from a bounded REST
//! snapshot, then folds live kline updates from one stream subscription.

pub mod aggregator;
pub mod error;
pub mod series;
pub mod snapshot;

pub use aggregator::{AggregatorConfig, AggregatorEvent, AggregatorStatus, RealtimeAggregator};
pub use error::{FeedError, FeedResult};
pub use series::{ApplyOutcome, CandleSeries};
pub use snapshot::SnapshotSource;

//! Core domain types for the tickstream market-data subsystem.
//!
//! This crate provides the types shared by every other tickstream crate:
//! - `StreamKey`: Unique identifier for one logical upstream stream
//! - `Price`, `Size`: Precision-safe numeric types
//! - `Candle`: The atomic unit of a realtime series
//! - `MarketEvent`: Typed events decoded from stream frames
//! - `ReconnectPolicy`: Exponential backoff with bounded retries
//! - `Clock`: Injectable wall-clock source

pub mod backoff;
pub mod candle;
pub mod clock;
pub mod decimal;
pub mod error;
pub mod events;
pub mod stream;

pub use backoff::{ReconnectPolicy, BACKOFF_MULTIPLIER, DEFAULT_MAX_DELAY, DEFAULT_MAX_JITTER};
pub use candle::{normalize_candles, Candle};
pub use clock::{Clock, ManualClock, SystemClock};
pub use decimal::{Price, Size};
pub use error::{CoreError, Result};
pub use events::{DepthDelta, KlineEvent, MarketEvent, PriceLevel, TickerEvent, TradeEvent};
pub use stream::{ChannelType, Interval, StreamKey, Symbol};

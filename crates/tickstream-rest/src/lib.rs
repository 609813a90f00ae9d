//! REST access to the exchange market-data API.
//!
//! Used for the historical candle snapshot that seeds a realtime series and
//! for the lightweight ping the connectivity prober times.

pub mod client;
pub mod error;

pub use client::{MarketDataClient, DEFAULT_TIMEOUT, MAX_KLINES_LIMIT};
pub use error::{RestError, RestResult};

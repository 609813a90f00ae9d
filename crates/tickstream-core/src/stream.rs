//! Stream identification types.
//!
//! A stream is one logical subscription to a named upstream channel for one
//! symbol. Its wire name has the form `<symbol>@<channel>[_<interval>]`,
//! e.g. `btcusdt@kline_1m`.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Upper bound on candles per snapshot request.
const MAX_SNAPSHOT_LIMIT: u32 = 1000;

/// Window a snapshot should cover.
const SNAPSHOT_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Trading pair symbol (e.g., "BTCUSDT").
///
/// Always stored uppercase; rendered lowercase in stream names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Symbol(String);

impl Symbol {
    /// Create a symbol, normalizing to uppercase.
    pub fn new(symbol: impl AsRef<str>) -> Result<Self> {
        let trimmed = symbol.as_ref().trim();
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(CoreError::InvalidSymbol(symbol.as_ref().to_string()));
        }
        Ok(Self(trimmed.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used in stream names.
    pub fn stream_form(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Symbol {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Symbol> for String {
    fn from(symbol: Symbol) -> Self {
        symbol.0
    }
}

/// Channel carried by a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    /// OHLCV candles; requires an interval.
    Kline,
    /// Rolling 24h ticker statistics.
    Ticker,
    /// Individual trades.
    Trade,
    /// Incremental order-book deltas.
    Depth,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Kline => "kline",
            Self::Ticker => "ticker",
            Self::Trade => "trade",
            Self::Depth => "depth",
        }
    }
}

impl fmt::Display for ChannelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Candle interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "2h")]
    H2,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "6h")]
    H6,
    #[serde(rename = "8h")]
    H8,
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "1d")]
    D1,
    #[serde(rename = "3d")]
    D3,
    #[serde(rename = "1w")]
    W1,
    #[serde(rename = "1M")]
    Mo1,
}

impl Interval {
    pub const ALL: [Interval; 15] = [
        Self::M1,
        Self::M3,
        Self::M5,
        Self::M15,
        Self::M30,
        Self::H1,
        Self::H2,
        Self::H4,
        Self::H6,
        Self::H8,
        Self::H12,
        Self::D1,
        Self::D3,
        Self::W1,
        Self::Mo1,
    ];

    /// Exchange interval code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M1 => "1m",
            Self::M3 => "3m",
            Self::M5 => "5m",
            Self::M15 => "15m",
            Self::M30 => "30m",
            Self::H1 => "1h",
            Self::H2 => "2h",
            Self::H4 => "4h",
            Self::H6 => "6h",
            Self::H8 => "8h",
            Self::H12 => "12h",
            Self::D1 => "1d",
            Self::D3 => "3d",
            Self::W1 => "1w",
            Self::Mo1 => "1M",
        }
    }

    /// Nominal candle length in seconds (a month counts as 30 days).
    pub fn seconds(&self) -> u64 {
        const MIN: u64 = 60;
        const HOUR: u64 = 60 * MIN;
        const DAY: u64 = 24 * HOUR;
        match self {
            Self::M1 => MIN,
            Self::M3 => 3 * MIN,
            Self::M5 => 5 * MIN,
            Self::M15 => 15 * MIN,
            Self::M30 => 30 * MIN,
            Self::H1 => HOUR,
            Self::H2 => 2 * HOUR,
            Self::H4 => 4 * HOUR,
            Self::H6 => 6 * HOUR,
            Self::H8 => 8 * HOUR,
            Self::H12 => 12 * HOUR,
            Self::D1 => DAY,
            Self::D3 => 3 * DAY,
            Self::W1 => 7 * DAY,
            Self::Mo1 => 30 * DAY,
        }
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.seconds())
    }

    /// Number of candles needed to cover 24h, clamped to the exchange limit.
    pub fn snapshot_limit(&self) -> u32 {
        let window = SNAPSHOT_WINDOW.as_secs();
        let count = window.div_ceil(self.seconds());
        count.clamp(1, MAX_SNAPSHOT_LIMIT as u64) as u32
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|i| i.as_str() == s)
            .ok_or_else(|| CoreError::InvalidInterval(s.to_string()))
    }
}

/// Unique identifier for one logical stream.
///
/// Used as the registry map key. Kline streams always carry an interval;
/// other channels never do.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamKey {
    pub symbol: Symbol,
    pub channel: ChannelType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<Interval>,
}

impl StreamKey {
    /// Create a key, validating the channel/interval combination.
    pub fn new(symbol: Symbol, channel: ChannelType, interval: Option<Interval>) -> Result<Self> {
        match (channel, interval) {
            (ChannelType::Kline, None) => Err(CoreError::InvalidStreamKey(format!(
                "{symbol}: kline stream requires an interval"
            ))),
            (ChannelType::Kline, Some(_)) | (_, None) => Ok(Self {
                symbol,
                channel,
                interval,
            }),
            (other, Some(i)) => Err(CoreError::InvalidStreamKey(format!(
                "{symbol}: {other} stream does not take an interval ({i})"
            ))),
        }
    }

    pub fn kline(symbol: Symbol, interval: Interval) -> Self {
        Self {
            symbol,
            channel: ChannelType::Kline,
            interval: Some(interval),
        }
    }

    pub fn ticker(symbol: Symbol) -> Self {
        Self {
            symbol,
            channel: ChannelType::Ticker,
            interval: None,
        }
    }

    pub fn trade(symbol: Symbol) -> Self {
        Self {
            symbol,
            channel: ChannelType::Trade,
            interval: None,
        }
    }

    pub fn depth(symbol: Symbol) -> Self {
        Self {
            symbol,
            channel: ChannelType::Depth,
            interval: None,
        }
    }

    /// Upstream stream name, e.g. `btcusdt@kline_1m`.
    pub fn stream_name(&self) -> String {
        match self.interval {
            Some(interval) => format!(
                "{}@{}_{}",
                self.symbol.stream_form(),
                self.channel,
                interval
            ),
            None => format!("{}@{}", self.symbol.stream_form(), self.channel),
        }
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stream_name())
    }
}

impl FromStr for StreamKey {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        let (symbol, channel) = s
            .split_once('@')
            .ok_or_else(|| CoreError::InvalidStreamKey(s.to_string()))?;
        let symbol = Symbol::new(symbol)?;

        if let Some(interval) = channel.strip_prefix("kline_") {
            return Ok(Self::kline(symbol, interval.parse()?));
        }

        match channel {
            "ticker" => Ok(Self::ticker(symbol)),
            "trade" => Ok(Self::trade(symbol)),
            "depth" => Ok(Self::depth(symbol)),
            _ => Err(CoreError::InvalidStreamKey(s.to_string())),
        }
    }
}

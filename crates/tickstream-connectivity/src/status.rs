//! Connectivity status and quality classification.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

/// Round trip below this is excellent.
pub const EXCELLENT_BELOW: Duration = Duration::from_millis(100);

/// Round trip below this is good.
pub const GOOD_BELOW: Duration = Duration::from_millis(300);

/// Link quality derived from probe latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionQuality {
    /// No probe has completed yet.
    #[default]
    Unknown,
    Excellent,
    Good,
    Poor,
    Offline,
}

impl ConnectionQuality {
    /// Classify a probe round trip; `None` means the probe failed.
    pub fn classify(latency: Option<Duration>) -> Self {
        match latency {
            None => Self::Offline,
            Some(rtt) if rtt < EXCELLENT_BELOW => Self::Excellent,
            Some(rtt) if rtt < GOOD_BELOW => Self::Good,
            Some(_) => Self::Poor,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Excellent => "excellent",
            Self::Good => "good",
            Self::Poor => "poor",
            Self::Offline => "offline",
        }
    }

    /// Gauge value exported on `tickstream_connectivity_quality`.
    pub fn metric_level(&self) -> f64 {
        match self {
            Self::Unknown => 0.0,
            Self::Offline => 1.0,
            Self::Poor => 2.0,
            Self::Good => 3.0,
            Self::Excellent => 4.0,
        }
    }
}

impl std::fmt::Display for ConnectionQuality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-wide connectivity status.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ConnectivityStatus {
    pub is_online: bool,
    /// A probe is in flight.
    pub is_connecting: bool,
    /// Set once consecutive failures exhaust the retry budget.
    pub has_error: bool,
    pub quality: ConnectionQuality,
    /// Consecutive failed probes.
    pub reconnect_attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    /// Round trip of the last successful probe.
    pub latency_ms: Option<f64>,
    pub last_error: Option<String>,
}

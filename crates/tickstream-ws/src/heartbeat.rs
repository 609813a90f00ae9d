//! Heartbeat monitoring for stream connections.
//!
//! Detects silently dead transports: the monitor checks every `interval`
//! and reports the connection stale once no frame of any kind has arrived
//! for longer than `stale_timeout`. Exchange streams push data continuously
//! and answer pings themselves, so no client ping is sent.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Per-session heartbeat monitor.
///
/// Owned by the connection task; one instance per open session.
#[derive(Debug)]
pub struct HeartbeatMonitor {
    /// How often staleness is checked.
    interval: Duration,
    /// Silence after which the connection is considered dead.
    stale_timeout: Duration,
    /// Last frame received (any kind).
    last_message: Instant,
}

impl HeartbeatMonitor {
    /// Create a new heartbeat monitor.
    ///
    /// `stale_timeout` is raised to `2 * interval` when configured lower, so
    /// a single late check can never declare a healthy stream dead.
    pub fn new(interval: Duration, stale_timeout: Duration) -> Self {
        let floor = interval.saturating_mul(2);
        let stale_timeout = if stale_timeout < floor {
            warn!(
                interval_ms = interval.as_millis() as u64,
                stale_timeout_ms = stale_timeout.as_millis() as u64,
                "Stale timeout below twice the heartbeat interval, raising it"
            );
            floor
        } else {
            stale_timeout
        };

        Self {
            interval,
            stale_timeout,
            last_message: Instant::now(),
        }
    }

    /// Reset heartbeat state (called on open).
    pub fn reset(&mut self) {
        self.last_message = Instant::now();
    }

    /// Record that any frame was received.
    pub fn record_message(&mut self) {
        self.last_message = Instant::now();
    }

    /// Time since the last frame.
    pub fn time_since_last_message(&self) -> Duration {
        self.last_message.elapsed()
    }

    /// Check if the connection has gone silent for too long.
    pub fn is_stale(&self) -> bool {
        let silent = self.time_since_last_message();
        if silent > self.stale_timeout {
            debug!(
                silent_ms = silent.as_millis() as u64,
                stale_timeout_ms = self.stale_timeout.as_millis() as u64,
                "Heartbeat stale"
            );
            return true;
        }
        false
    }

    pub fn stale_timeout(&self) -> Duration {
        self.stale_timeout
    }

    /// Ticker that fires every `interval`, first tick one interval from now.
    pub fn ticker(&self) -> Interval {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }
}

//! Reconnection backoff policy.
//!
//! `delay(attempt) = min(base * 1.5^attempt + jitter, max_delay)` with jitter
//! drawn uniformly from `[0, max_jitter]`, and `give_up(attempt)` once
//! `attempt >= max_retries`. `attempt` counts consecutive failures since the
//! last successful open.
//!
//! The policy is shared by every stream connection and by the connectivity
//! prober; each caller keeps its own attempt counter.

use rand::Rng;
use std::time::Duration;

/// Growth factor between consecutive attempts.
pub const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Default ceiling for any computed delay.
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default upper bound for random jitter.
pub const DEFAULT_MAX_JITTER: Duration = Duration::from_millis(1000);

/// Exponential backoff with jitter and a bounded retry count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
    max_retries: u32,
}

impl ReconnectPolicy {
    pub fn new(base_delay: Duration, max_retries: u32) -> Self {
        Self {
            base_delay,
            max_delay: DEFAULT_MAX_DELAY,
            max_jitter: DEFAULT_MAX_JITTER,
            max_retries,
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn max_delay(&self) -> Duration {
        self.max_delay
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the next attempt, with random jitter.
    pub fn delay(&self, attempt: u32) -> Duration {
        let jitter_ms = match self.max_jitter.as_millis() as u64 {
            0 => 0,
            max => rand::thread_rng().gen_range(0..=max),
        };
        self.delay_with_jitter(attempt, Duration::from_millis(jitter_ms))
    }

    /// Deterministic core of [`delay`](Self::delay).
    pub fn delay_with_jitter(&self, attempt: u32, jitter: Duration) -> Duration {
        let exponent = attempt.min(64) as i32;
        let grown = self.base_delay.as_millis() as f64 * BACKOFF_MULTIPLIER.powi(exponent);
        let total = grown + jitter.as_millis() as f64;
        let capped = total.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Whether `attempt` consecutive failures exhaust the retry budget.
    pub fn give_up(&self, attempt: u32) -> bool {
        attempt >= self.max_retries
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(1000), 5)
    }
}

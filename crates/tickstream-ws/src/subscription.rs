//! Subscription types shared between the registry and its consumers.
//!
//! A subscription is identified by a [`SubscriptionHandle`] (stream key plus
//! a unique id). Re-subscribing the same key produces a new handle; the old
//! handle becomes inert.

use crate::connection::ConnectionStatus;
use crate::error::{WsError, WsResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tickstream_core::{MarketEvent, ReconnectPolicy, StreamKey};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Retry and heartbeat configuration for one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Consecutive failed attempts before the stream gives up.
    pub max_retries: u32,
    /// Base reconnect delay.
    pub base_delay_ms: u64,
    /// Cap on any reconnect delay.
    pub max_delay_ms: u64,
    /// Heartbeat check interval.
    pub heartbeat_interval_ms: u64,
    /// Silence after which the transport is considered dead.
    pub stale_timeout_ms: u64,
    /// Reconnect automatically after a failure.
    pub auto_reconnect: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            heartbeat_interval_ms: 30_000,
            stale_timeout_ms: 60_000,
            auto_reconnect: true,
        }
    }
}

impl RetryConfig {
    /// Backoff policy derived from this configuration.
    pub fn policy(&self) -> ReconnectPolicy {
        ReconnectPolicy::new(Duration::from_millis(self.base_delay_ms), self.max_retries)
            .with_max_delay(Duration::from_millis(self.max_delay_ms))
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn validate(&self) -> WsResult<()> {
        if self.heartbeat_interval_ms == 0 {
            return Err(WsError::InvalidConfig(
                "heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_retries == 0 {
            return Err(WsError::InvalidConfig(
                "max_retries must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Identifies one live subscription.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: StreamKey,
    id: Uuid,
}

impl SubscriptionHandle {
    pub(crate) fn new(key: StreamKey) -> Self {
        Self {
            key,
            id: Uuid::new_v4(),
        }
    }

    pub fn key(&self) -> &StreamKey {
        &self.key
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

/// Event delivered to a subscription's consumer, in arrival order.
#[derive(Debug)]
pub enum StreamEvent {
    /// The connection moved to a new status.
    StateChanged(ConnectionStatus),
    /// A decoded market event.
    Data(MarketEvent),
    /// A session ended with an error, or a frame could not be decoded.
    Error(WsError),
    /// The stream gave up after exhausting its retry budget.
    MaxRetriesReached { attempts: u32 },
}

/// Result of [`StreamRegistry::subscribe`](crate::StreamRegistry::subscribe).
#[derive(Debug)]
pub struct StreamSubscription {
    pub handle: SubscriptionHandle,
    pub events: mpsc::Receiver<StreamEvent>,
}

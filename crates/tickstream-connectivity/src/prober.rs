//! Periodic connectivity prober.
//!
//! Probes on a fixed interval, immediately on `connect()`/`retry()`, and
//! immediately when the network comes back. While probes fail the next one
//! follows the shared backoff policy; once the retry budget is spent the
//! status carries `has_error` and probing falls back to the regular interval.
//! The prober's attempt counter is its own and never touches any stream's.

use crate::error::{ConnectivityError, ConnectivityResult};
use crate::status::{ConnectionQuality, ConnectivityStatus};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{Clock, ReconnectPolicy, SystemClock};
use tickstream_rest::MarketDataClient;
use tickstream_telemetry::Metrics;
use tokio::sync::{watch, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Request whose round trip measures connectivity.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LatencyProbe: Send + Sync + 'static {
    async fn probe(&self) -> ConnectivityResult<()>;
}

#[async_trait]
impl LatencyProbe for MarketDataClient {
    async fn probe(&self) -> ConnectivityResult<()> {
        self.ping().await.map_err(ConnectivityError::from)
    }
}

/// Prober configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProberConfig {
    /// Regular probe interval.
    pub interval_ms: u64,
    /// Bound on a single probe.
    pub timeout_ms: u64,
    /// Consecutive failures before `has_error` is raised.
    pub max_retries: u32,
    /// Base backoff between failing probes.
    pub base_delay_ms: u64,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            timeout_ms: 5_000,
            max_retries: 5,
            base_delay_ms: 1_000,
        }
    }
}

impl ProberConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Connectivity prober publishing a [`ConnectivityStatus`].
pub struct ConnectivityProber {
    probe: Arc<dyn LatencyProbe>,
    clock: Arc<dyn Clock>,
    config: ProberConfig,
    policy: ReconnectPolicy,
    status_tx: watch::Sender<ConnectivityStatus>,
    attempts: AtomicU32,
    network_available: AtomicBool,
    wake: Notify,
}

impl ConnectivityProber {
    pub fn new(probe: Arc<dyn LatencyProbe>, config: ProberConfig) -> Self {
        Self::with_clock(probe, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        probe: Arc<dyn LatencyProbe>,
        config: ProberConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let policy = ReconnectPolicy::new(
            Duration::from_millis(config.base_delay_ms),
            config.max_retries,
        )
        .with_max_delay(config.interval());
        let (status_tx, _) = watch::channel(ConnectivityStatus::default());
        Metrics::connectivity_quality(ConnectionQuality::Unknown.metric_level());

        Self {
            probe,
            clock,
            config,
            policy,
            status_tx,
            attempts: AtomicU32::new(0),
            network_available: AtomicBool::new(true),
            wake: Notify::new(),
        }
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectivityStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectivityStatus {
        self.status_tx.borrow().clone()
    }

    pub fn quality(&self) -> ConnectionQuality {
        self.status_tx.borrow().quality
    }

    /// Probe now.
    pub fn connect(&self) {
        self.wake.notify_one();
    }

    /// Probe now. Same as [`connect`](Self::connect).
    pub fn retry(&self) {
        self.connect();
    }

    /// Transport-level online/offline signal.
    ///
    /// Going offline publishes `Offline` immediately; coming back probes now.
    pub fn set_network_available(&self, available: bool) {
        let was = self.network_available.swap(available, Ordering::SeqCst);
        if available {
            if !was {
                info!("Network available, probing");
            }
            self.wake.notify_one();
        } else {
            warn!("Network unavailable");
            self.publish(|s| {
                s.is_online = false;
                s.is_connecting = false;
                s.quality = ConnectionQuality::Offline;
                s.latency_ms = None;
                s.last_error =
                    Some(ConnectivityError::Offline("network unavailable".to_string()).to_string());
            });
        }
    }

    /// Run one probe and publish the result.
    pub async fn probe_once(&self) -> ConnectionQuality {
        if !self.network_available.load(Ordering::SeqCst) {
            debug!("Skipping probe while network is unavailable");
            return ConnectionQuality::Offline;
        }

        self.publish(|s| s.is_connecting = true);

        let timeout = self.config.timeout();
        let start = Instant::now();
        let result = match tokio::time::timeout(timeout, self.probe.probe()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectivityError::ProbeTimeout(timeout)),
        };
        let elapsed = start.elapsed();

        match result {
            Ok(()) => self.on_success(elapsed),
            Err(e) => self.on_failure(e),
        }
    }

    fn on_success(&self, rtt: Duration) -> ConnectionQuality {
        self.attempts.store(0, Ordering::SeqCst);
        let quality = ConnectionQuality::classify(Some(rtt));
        let latency_ms = rtt.as_micros() as f64 / 1000.0;
        let now = self.clock.now();

        self.publish(|s| {
            *s = ConnectivityStatus {
                is_online: true,
                is_connecting: false,
                has_error: false,
                quality,
                reconnect_attempts: 0,
                last_connected: Some(now),
                latency_ms: Some(latency_ms),
                last_error: None,
            };
        });
        Metrics::probe_latency(latency_ms);
        debug!(latency_ms, %quality, "Probe succeeded");
        quality
    }

    fn on_failure(&self, error: ConnectivityError) -> ConnectionQuality {
        let attempts = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let has_error = self.policy.give_up(attempts);
        warn!(attempts, has_error, error = %error, "Probe failed");

        self.publish(|s| {
            s.is_online = false;
            s.is_connecting = false;
            s.has_error = has_error;
            s.quality = ConnectionQuality::Offline;
            s.reconnect_attempts = attempts;
            s.latency_ms = None;
            s.last_error = Some(error.to_string());
        });
        ConnectionQuality::Offline
    }

    fn publish(&self, f: impl FnOnce(&mut ConnectivityStatus)) {
        self.status_tx.send_modify(f);
        Metrics::connectivity_quality(self.quality().metric_level());
    }

    /// Wait before the next probe: backoff while failing, the regular
    /// interval otherwise.
    fn next_delay(&self) -> Duration {
        let attempts = self.attempts.load(Ordering::SeqCst);
        if attempts == 0 || self.policy.give_up(attempts) {
            self.config.interval()
        } else {
            self.policy.delay(attempts - 1)
        }
    }

    /// Probe until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            interval_ms = self.config.interval_ms,
            timeout_ms = self.config.timeout_ms,
            "Connectivity prober started"
        );

        loop {
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                _ = self.probe_once() => {}
            }

            let delay = self.next_delay();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => break,
                () = self.wake.notified() => debug!("Immediate probe requested"),
                () = tokio::time::sleep(delay) => {}
            }
        }

        info!("Connectivity prober stopped");
    }
}

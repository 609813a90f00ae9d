//! Per-stream connection task.
//!
//! Each subscribed stream runs one `Connection` task that owns its transport
//! session and drives this state machine:
//!
//! ```text
//! Connecting ──open──▶ Connected ──failure──▶ Reconnecting ──delay──▶ Connecting
//!      │                                           ▲   │
//!      └─────────────failure───────────────────────┘   └──▶ Errored (retry budget spent)
//! any ──unsubscribe──▶ Disconnected
//! ```
//!
//! `Errored` is terminal until the consumer asks for a retry.

use crate::codec;
use crate::error::WsError;
use crate::heartbeat::HeartbeatMonitor;
use crate::subscription::{RetryConfig, StreamEvent};
use crate::transport::{CloseReason, Frame, Transport, TransportSession};
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{Clock, ReconnectPolicy, StreamKey};
use tickstream_telemetry::Metrics;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Errored,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::Errored => "errored",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observable state of one stream connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Wall-clock time of the last frame received.
    pub last_message_at: Option<DateTime<Utc>>,
    /// Consecutive failed attempts since the last successful open.
    pub reconnect_attempts: u32,
    /// False once the heartbeat has declared the transport stale.
    pub is_healthy: bool,
    /// Lag between exchange event time and receipt of the last event.
    pub latency_ms: f64,
}

impl ConnectionState {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            last_message_at: None,
            reconnect_attempts: 0,
            is_healthy: true,
            latency_ms: 0.0,
        }
    }

    /// Connected and not flagged stale.
    pub fn is_live(&self) -> bool {
        self.status == ConnectionStatus::Connected && self.is_healthy
    }
}

/// State shared between a connection task and the registry.
///
/// Only the owning task writes `state`; the registry reads it and pokes
/// `retry` to request an immediate reconnect.
pub(crate) struct ConnectionShared {
    state: RwLock<ConnectionState>,
    retry: Notify,
}

impl ConnectionShared {
    pub(crate) fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::new()),
            retry: Notify::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> ConnectionState {
        self.state.read().clone()
    }

    pub(crate) fn request_retry(&self) {
        self.retry.notify_one();
    }

    fn update(&self, f: impl FnOnce(&mut ConnectionState)) {
        f(&mut self.state.write());
    }
}

/// How an open session ended.
enum SessionEnd {
    Cancelled,
    ManualReconnect,
    Failed(WsError),
}

/// Connection task for a single stream.
pub(crate) struct Connection {
    stream_name: String,
    config: RetryConfig,
    policy: ReconnectPolicy,
    open_timeout: Duration,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    shared: Arc<ConnectionShared>,
    events: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    receiver_gone: AtomicBool,
}

/// Construction parameters for [`Connection`].
pub(crate) struct ConnectionParams {
    pub key: StreamKey,
    pub config: RetryConfig,
    pub open_timeout: Duration,
    pub transport: Arc<dyn Transport>,
    pub clock: Arc<dyn Clock>,
    pub shared: Arc<ConnectionShared>,
    pub events: mpsc::Sender<StreamEvent>,
    pub cancel: CancellationToken,
}

impl Connection {
    pub(crate) fn new(params: ConnectionParams) -> Self {
        Self {
            stream_name: params.key.stream_name(),
            policy: params.config.policy(),
            config: params.config,
            open_timeout: params.open_timeout,
            transport: params.transport,
            clock: params.clock,
            shared: params.shared,
            events: params.events,
            cancel: params.cancel,
            receiver_gone: AtomicBool::new(false),
        }
    }

    /// Run until cancelled, or until the first failure when auto-reconnect
    /// is disabled.
    pub(crate) async fn run(self) {
        let mut attempt = 0u32;

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.begin_attempt(attempt).await;

            let opened = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                res = tokio::time::timeout(self.open_timeout, self.transport.open(&self.stream_name)) => {
                    res.unwrap_or(Err(WsError::OpenTimeout(self.open_timeout)))
                }
            };

            let failure = match opened {
                Ok(mut session) => {
                    if self.cancel.is_cancelled() {
                        let _ = session.close(CloseReason::MANUAL).await;
                        break;
                    }

                    // A retry requested while opening is satisfied by this session
                    if self.shared.retry.notified().now_or_never().is_some() {
                        debug!(stream = %self.stream_name, "Retry request absorbed by fresh session");
                    }

                    attempt = 0;
                    info!(stream = %self.stream_name, "Stream connected");
                    self.set_status(ConnectionStatus::Connected, |s| {
                        s.reconnect_attempts = 0;
                        s.is_healthy = true;
                    })
                    .await;

                    match self.pump(session.as_mut()).await {
                        SessionEnd::Cancelled => break,
                        SessionEnd::ManualReconnect => {
                            info!(stream = %self.stream_name, "Manual reconnect requested");
                            Metrics::ws_reconnect(&self.stream_name, "manual");
                            continue;
                        }
                        SessionEnd::Failed(e) => e,
                    }
                }
                Err(e) => e,
            };

            warn!(stream = %self.stream_name, error = %failure, "Stream session failed");
            let reason = failure.kind();
            self.emit(StreamEvent::Error(failure)).await;

            if !self.config.auto_reconnect {
                info!(stream = %self.stream_name, "Auto-reconnect disabled, stopping");
                break;
            }

            attempt += 1;
            self.set_status(ConnectionStatus::Reconnecting, |s| {
                s.reconnect_attempts = attempt;
            })
            .await;

            if self.policy.give_up(attempt) {
                error!(
                    stream = %self.stream_name,
                    attempt,
                    "Max reconnection attempts reached"
                );
                Metrics::ws_max_retries(&self.stream_name);
                self.set_status(ConnectionStatus::Errored, |_| {}).await;
                self.emit(StreamEvent::MaxRetriesReached { attempts: attempt })
                    .await;

                // Stay down until the consumer asks again
                tokio::select! {
                    biased;
                    () = self.cancel.cancelled() => break,
                    () = self.shared.retry.notified() => {
                        info!(stream = %self.stream_name, "Retry requested after giving up");
                        attempt = 0;
                        continue;
                    }
                }
            }

            Metrics::ws_reconnect(&self.stream_name, reason);
            let delay = self.policy.delay(attempt - 1);
            warn!(
                stream = %self.stream_name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            // Cancellation-aware backoff; a retry request skips the wait
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                () = self.shared.retry.notified() => {
                    debug!(stream = %self.stream_name, "Backoff skipped by retry request");
                    attempt = 0;
                }
                () = tokio::time::sleep(delay) => {}
            }
        }

        self.finish();
    }

    /// Read frames until the session ends.
    async fn pump(&self, session: &mut dyn TransportSession) -> SessionEnd {
        let mut heartbeat =
            HeartbeatMonitor::new(self.config.heartbeat_interval(), self.config.stale_timeout());
        heartbeat.reset();
        let mut ticker = heartbeat.ticker();

        loop {
            tokio::select! {
                biased;

                () = self.cancel.cancelled() => {
                    info!(stream = %self.stream_name, "Closing stream");
                    if let Err(e) = session.close(CloseReason::MANUAL).await {
                        warn!(stream = %self.stream_name, ?e, "Close during unsubscribe failed");
                    }
                    return SessionEnd::Cancelled;
                }

                () = self.shared.retry.notified() => {
                    let _ = session.close(CloseReason::MANUAL_RECONNECT).await;
                    return SessionEnd::ManualReconnect;
                }

                _ = ticker.tick() => {
                    if heartbeat.is_stale() {
                        let silent_ms = heartbeat.time_since_last_message().as_millis() as u64;
                        error!(stream = %self.stream_name, silent_ms, "Heartbeat timeout");
                        self.shared.update(|s| s.is_healthy = false);
                        let _ = session.close(CloseReason::HEARTBEAT_TIMEOUT).await;
                        return SessionEnd::Failed(WsError::StaleConnection { silent_ms });
                    }
                }

                frame = session.next_frame() => {
                    match frame {
                        Some(Ok(Frame::Text(text))) => {
                            heartbeat.record_message();
                            self.handle_text(&text).await;
                        }
                        Some(Ok(Frame::Ping(data))) => {
                            heartbeat.record_message();
                            self.touch();
                            if let Err(e) = session.pong(data).await {
                                return SessionEnd::Failed(e);
                            }
                        }
                        Some(Ok(Frame::Pong)) => {
                            heartbeat.record_message();
                            self.touch();
                        }
                        Some(Ok(Frame::Close { code, reason })) => {
                            warn!(stream = %self.stream_name, code, %reason, "Stream closed by server");
                            return SessionEnd::Failed(WsError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(stream = %self.stream_name, ?e, "Stream read error");
                            return SessionEnd::Failed(e);
                        }
                        None => {
                            warn!(stream = %self.stream_name, "Stream ended");
                            return SessionEnd::Failed(WsError::ConnectionClosed {
                                code: 1006,
                                reason: "stream ended".to_string(),
                            });
                        }
                    }
                }
            }
        }
    }

    async fn handle_text(&self, text: &str) {
        match codec::decode(text) {
            Ok(Some(event)) => {
                let now = self.clock.now();
                let event_time = event.event_time();
                let latency_ms = if event_time > 0 {
                    (self.clock.now_ms() as i64 - event_time).max(0) as f64
                } else {
                    0.0
                };

                self.shared.update(|s| {
                    s.last_message_at = Some(now);
                    s.latency_ms = latency_ms;
                    s.is_healthy = true;
                });
                Metrics::ws_frame(&self.stream_name, event.kind());
                if event_time > 0 {
                    Metrics::feed_latency(&self.stream_name, latency_ms);
                }

                self.emit(StreamEvent::Data(event)).await;
            }
            Ok(None) => {
                self.touch();
                debug!(stream = %self.stream_name, "Control frame ignored");
            }
            Err(e) => {
                self.touch();
                Metrics::ws_protocol_error(&self.stream_name);
                warn!(stream = %self.stream_name, error = %e, "Dropping undecodable frame");
                self.emit(StreamEvent::Error(e)).await;
            }
        }
    }

    fn touch(&self) {
        let now = self.clock.now();
        self.shared.update(|s| {
            s.last_message_at = Some(now);
            s.is_healthy = true;
        });
    }

    /// Enter `Connecting` for a new open attempt. Announced even when the
    /// status is unchanged.
    async fn begin_attempt(&self, attempt: u32) {
        self.shared.update(|s| {
            s.status = ConnectionStatus::Connecting;
            s.reconnect_attempts = attempt;
        });
        Metrics::ws_state_set(&self.stream_name, ConnectionStatus::Connecting.as_str());
        debug!(stream = %self.stream_name, attempt, "Opening stream");
        self.emit(StreamEvent::StateChanged(ConnectionStatus::Connecting))
            .await;
    }

    async fn set_status(&self, status: ConnectionStatus, f: impl FnOnce(&mut ConnectionState)) {
        let changed = {
            let mut state = self.shared.state.write();
            let changed = state.status != status;
            state.status = status;
            f(&mut state);
            changed
        };
        Metrics::ws_state_set(&self.stream_name, status.as_str());
        if changed {
            debug!(stream = %self.stream_name, %status, "State changed");
            self.emit(StreamEvent::StateChanged(status)).await;
        }
    }

    /// Deliver an event in order. A full channel applies backpressure until
    /// the consumer catches up or the connection is cancelled.
    async fn emit(&self, event: StreamEvent) {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => {}
            res = self.events.send(event) => {
                if res.is_err() && !self.receiver_gone.swap(true, Ordering::Relaxed) {
                    warn!(stream = %self.stream_name, "Event receiver dropped");
                }
            }
        }
    }

    fn finish(&self) {
        self.shared
            .update(|s| s.status = ConnectionStatus::Disconnected);
        Metrics::ws_state_set(&self.stream_name, ConnectionStatus::Disconnected.as_str());
        // Best effort: the consumer may already be gone after an unsubscribe
        let _ = self
            .events
            .try_send(StreamEvent::StateChanged(ConnectionStatus::Disconnected));
        info!(stream = %self.stream_name, "Stream connection stopped");
    }
}

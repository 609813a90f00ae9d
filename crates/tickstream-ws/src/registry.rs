//! Stream registry: owns every live stream connection.
//!
//! At most one connection exists per [`StreamKey`]. Subscribing a key that
//! is already live atomically replaces the old connection; the previous
//! handle then becomes inert. All mutations of the registry map happen under
//! one lock, so subscribe and unsubscribe are linearizable.

use crate::connection::{Connection, ConnectionParams, ConnectionShared, ConnectionState};
use crate::error::{WsError, WsResult};
use crate::subscription::{RetryConfig, StreamSubscription, SubscriptionHandle};
use crate::transport::{Transport, TungsteniteTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{Clock, StreamKey, SystemClock};
use tickstream_telemetry::Metrics;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Registry configuration.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL; each stream connects to `{ws_base_url}/{stream_name}`.
    pub ws_base_url: String,
    /// Bound on the open handshake.
    pub open_timeout: Duration,
    /// Per-subscription event channel capacity.
    pub event_buffer: usize,
    /// How long unsubscribe waits for a connection task to stop.
    pub stop_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            ws_base_url: "wss://stream.binance.com:9443/ws".to_string(),
            open_timeout: Duration::from_secs(10),
            event_buffer: 1024,
            stop_timeout: Duration::from_secs(5),
        }
    }
}

struct ConnectionEntry {
    handle: SubscriptionHandle,
    shared: Arc<ConnectionShared>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Registry of live stream connections.
pub struct StreamRegistry {
    config: RegistryConfig,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    streams: Mutex<HashMap<StreamKey, ConnectionEntry>>,
    /// Parent of every connection's cancellation token.
    root: CancellationToken,
}

impl StreamRegistry {
    /// Create a registry that connects over WebSocket.
    pub fn new(config: RegistryConfig) -> Self {
        let transport = Arc::new(TungsteniteTransport::new(config.ws_base_url.clone()));
        Self::with_transport(config, transport, Arc::new(SystemClock))
    }

    pub fn with_transport(
        config: RegistryConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            transport,
            clock,
            streams: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Open a connection for `key` and start delivering its events.
    ///
    /// Must be called from within a tokio runtime.
    pub fn subscribe(&self, key: StreamKey, retry: RetryConfig) -> WsResult<StreamSubscription> {
        retry.validate()?;
        if self.root.is_cancelled() {
            return Err(WsError::Shutdown);
        }

        let (tx, rx) = mpsc::channel(self.config.event_buffer.max(1));
        let handle = SubscriptionHandle::new(key.clone());
        let shared = Arc::new(ConnectionShared::new());
        let cancel = self.root.child_token();

        let connection = Connection::new(ConnectionParams {
            key: key.clone(),
            config: retry,
            open_timeout: self.config.open_timeout,
            transport: Arc::clone(&self.transport),
            clock: Arc::clone(&self.clock),
            shared: Arc::clone(&shared),
            events: tx,
            cancel: cancel.clone(),
        });

        let mut streams = self.streams.lock();
        if let Some(previous) = streams.remove(&key) {
            info!(stream = %key, "Replacing existing subscription");
            previous.cancel.cancel();
        }
        let task = tokio::spawn(connection.run());
        streams.insert(
            key.clone(),
            ConnectionEntry {
                handle: handle.clone(),
                shared,
                cancel,
                task,
            },
        );
        drop(streams);

        info!(stream = %key, id = %handle.id(), "Subscribed");
        Ok(StreamSubscription { handle, events: rx })
    }

    /// Close the connection behind `handle`.
    ///
    /// Returns `false` when the handle is no longer active (already
    /// unsubscribed or replaced). Waits up to `stop_timeout` for the
    /// connection task to finish.
    pub async fn unsubscribe(&self, handle: &SubscriptionHandle) -> bool {
        let entry = {
            let mut streams = self.streams.lock();
            match streams.get(handle.key()) {
                Some(entry) if entry.handle == *handle => {
                    let entry = streams.remove(handle.key());
                    if let Some(entry) = &entry {
                        entry.cancel.cancel();
                    }
                    entry
                }
                _ => None,
            }
        };

        let Some(entry) = entry else {
            debug!(stream = %handle.key(), "Unsubscribe for inactive handle ignored");
            return false;
        };

        self.await_stop(handle.key(), entry.task).await;
        Metrics::ws_stream_removed(&handle.key().stream_name());
        info!(stream = %handle.key(), "Unsubscribed");
        true
    }

    async fn await_stop(&self, key: &StreamKey, task: JoinHandle<()>) {
        match tokio::time::timeout(self.config.stop_timeout, task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(stream = %key, ?e, "Connection task failed"),
            Err(_) => warn!(stream = %key, "Connection task did not stop in time"),
        }
    }

    /// Current state of the connection for `key`.
    pub fn connection_state(&self, key: &StreamKey) -> Option<ConnectionState> {
        self.streams.lock().get(key).map(|e| e.shared.snapshot())
    }

    /// Whether `key` is connected and not flagged stale.
    pub fn is_healthy(&self, key: &StreamKey) -> bool {
        self.connection_state(key)
            .map(|s| s.is_live())
            .unwrap_or(false)
    }

    /// Reconnect `key` immediately, resetting its attempt counter.
    ///
    /// Revives a stream that gave up. Returns `false` if `key` is not live.
    pub fn retry(&self, key: &StreamKey) -> bool {
        match self.streams.lock().get(key) {
            Some(entry) => {
                entry.shared.request_retry();
                true
            }
            None => false,
        }
    }

    /// Reconnect every live stream. Returns the number of streams poked.
    pub fn reconnect_all(&self) -> usize {
        let streams = self.streams.lock();
        for entry in streams.values() {
            entry.shared.request_retry();
        }
        info!(count = streams.len(), "Reconnecting all streams");
        streams.len()
    }

    /// Keys of all live subscriptions.
    pub fn active_streams(&self) -> Vec<StreamKey> {
        let mut keys: Vec<_> = self.streams.lock().keys().cloned().collect();
        keys.sort_by_key(|k| k.stream_name());
        keys
    }

    /// Key and state of every live subscription, sorted by stream name.
    pub fn states(&self) -> Vec<(StreamKey, ConnectionState)> {
        let mut states: Vec<_> = self
            .streams
            .lock()
            .iter()
            .map(|(k, e)| (k.clone(), e.shared.snapshot()))
            .collect();
        states.sort_by_key(|(k, _)| k.stream_name());
        states
    }

    pub fn len(&self) -> usize {
        self.streams.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.lock().is_empty()
    }

    /// Close every connection and refuse further subscriptions.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let entries: Vec<_> = self.streams.lock().drain().collect();
        info!(count = entries.len(), "Shutting down stream registry");

        for (key, entry) in entries {
            self.await_stop(&key, entry.task).await;
            Metrics::ws_stream_removed(&key.stream_name());
        }
    }
}

impl Drop for StreamRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

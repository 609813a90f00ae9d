//! Main application orchestration.
//!
//! Coordinates all components:
//! - One stream registry shared by every consumer
//! - Connectivity prober, fed with stream health as its network signal
//! - Realtime aggregators for the configured charts
//! - Raw stream subscriptions
//! - HTTP status server

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::http::{self, AppState};
use std::sync::Arc;
use std::time::Duration;
use tickstream_connectivity::{ConnectivityProber, ConnectivityStatus};
use tickstream_core::{Clock, SystemClock};
use tickstream_feed::{RealtimeAggregator, SnapshotSource};
use tickstream_rest::MarketDataClient;
use tickstream_ws::{ConnectionStatus, StreamEvent, StreamRegistry, StreamSubscription};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How often stream health is folded into the prober's network signal.
const NETWORK_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Main application.
pub struct Application {
    config: AppConfig,
    registry: Arc<StreamRegistry>,
    rest: Arc<MarketDataClient>,
    prober: Arc<ConnectivityProber>,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
}

impl Application {
    /// Create a new application. Nothing connects until [`run`](Self::run).
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;

        let registry = Arc::new(StreamRegistry::new(config.registry_config()));
        let rest = Arc::new(MarketDataClient::new(config.rest_base_url.clone())?);
        let prober = Arc::new(ConnectivityProber::new(
            Arc::clone(&rest) as _,
            config.prober.clone(),
        ));

        Ok(Self {
            config,
            registry,
            rest,
            prober,
            clock: Arc::new(SystemClock),
            shutdown: CancellationToken::new(),
        })
    }

    /// Token that stops [`run`](Self::run) when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn registry(&self) -> &Arc<StreamRegistry> {
        &self.registry
    }

    pub fn prober(&self) -> &Arc<ConnectivityProber> {
        &self.prober
    }

    /// Run until Ctrl-C or the shutdown token fires.
    pub async fn run(self) -> AppResult<()> {
        info!(
            charts = self.config.charts.len(),
            streams = self.config.streams.len(),
            "Starting application"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        let prober = Arc::clone(&self.prober);
        let prober_shutdown = self.shutdown.child_token();
        tasks.push(tokio::spawn(async move { prober.run(prober_shutdown).await }));

        tasks.push(tokio::spawn(track_network_from_streams(
            Arc::clone(&self.registry),
            Arc::clone(&self.prober),
            NETWORK_CHECK_INTERVAL,
            self.shutdown.child_token(),
        )));

        tasks.push(tokio::spawn(retry_errored_on_recovery(
            Arc::clone(&self.registry),
            self.prober.subscribe(),
            self.shutdown.child_token(),
        )));

        let aggregators = match self.start_components(&mut tasks).await {
            Ok(aggregators) => aggregators,
            Err(e) => {
                error!(error = %e, "Startup failed");
                self.shutdown.cancel();
                self.registry.shutdown().await;
                return Err(e);
            }
        };

        let status_interval = Duration::from_millis(self.config.telemetry.status_log_interval_ms);
        let mut status_tick = (!status_interval.is_zero()).then(|| {
            let mut tick = tokio::time::interval_at(
                tokio::time::Instant::now() + status_interval,
                status_interval,
            );
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            tick
        });

        info!("Application running, press Ctrl-C to stop");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl-C, shutting down");
                    break;
                }
                () = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                () = next_tick(&mut status_tick) => {
                    self.log_status(&aggregators);
                }
            }
        }

        self.shutdown.cancel();
        for aggregator in &aggregators {
            aggregator.stop().await;
        }
        self.registry.shutdown().await;
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        info!("Application stopped");
        Ok(())
    }

    /// Aggregators first, then raw streams, then the status server.
    async fn start_components(
        &self,
        tasks: &mut Vec<JoinHandle<()>>,
    ) -> AppResult<Vec<Arc<RealtimeAggregator>>> {
        let aggregators = self.start_aggregators().await?;

        let retry = self.config.websocket.retry.clone();
        for key in self.config.stream_keys()? {
            let sub = self.registry.subscribe(key, retry.clone())?;
            tasks.push(tokio::spawn(drain_stream(sub, self.shutdown.child_token())));
        }

        if self.config.telemetry.http_port != 0 {
            let listener =
                TcpListener::bind(("0.0.0.0", self.config.telemetry.http_port)).await?;
            let state = AppState::new(
                Arc::clone(&self.registry),
                Arc::clone(&self.prober),
                aggregators.clone(),
            );
            let server_shutdown = self.shutdown.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = http::serve(listener, state, server_shutdown).await {
                    error!(error = %e, "Status server failed");
                }
            }));
        }

        Ok(aggregators)
    }

    async fn start_aggregators(&self) -> AppResult<Vec<Arc<RealtimeAggregator>>> {
        let source: Arc<dyn SnapshotSource> = Arc::clone(&self.rest) as _;
        let config = self.config.aggregator_config();

        let mut aggregators = Vec::with_capacity(self.config.charts.len());
        for chart in &self.config.charts {
            let aggregator = RealtimeAggregator::start(
                Arc::clone(&self.registry),
                Arc::clone(&source),
                Arc::clone(&self.clock),
                chart.symbol.clone(),
                chart.interval,
                config.clone(),
            )
            .await?;
            aggregators.push(Arc::new(aggregator));
        }
        Ok(aggregators)
    }

    fn log_status(&self, aggregators: &[Arc<RealtimeAggregator>]) {
        let connectivity = self.prober.status();
        let states = self.registry.states();
        let live = states.iter().filter(|(_, s)| s.is_live()).count();
        info!(
            online = connectivity.is_online,
            quality = %connectivity.quality,
            latency_ms = ?connectivity.latency_ms,
            streams = states.len(),
            live,
            "Status"
        );

        for (key, state) in states.iter().filter(|(_, s)| !s.is_live()) {
            warn!(
                stream = %key,
                status = %state.status,
                attempts = state.reconnect_attempts,
                healthy = state.is_healthy,
                "Stream not live"
            );
        }

        for aggregator in aggregators {
            let status = aggregator.status();
            info!(
                series = %status.stream,
                len = status.len,
                last_candle_time = ?status.last_candle_time,
                stale = status.is_stale,
                "Series"
            );
        }
    }
}

async fn next_tick(tick: &mut Option<tokio::time::Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Log every event of a raw stream subscription.
async fn drain_stream(mut sub: StreamSubscription, shutdown: CancellationToken) {
    let key = sub.handle.key().clone();

    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            event = sub.events.recv() => event,
        };

        match event {
            Some(StreamEvent::Data(event)) => debug!(
                stream = %key,
                kind = event.kind(),
                event_time = event.event_time(),
                "Market event"
            ),
            Some(StreamEvent::StateChanged(status)) => {
                info!(stream = %key, %status, "Stream state changed");
            }
            Some(StreamEvent::Error(e)) => warn!(stream = %key, error = %e, "Stream error"),
            Some(StreamEvent::MaxRetriesReached { attempts }) => {
                error!(stream = %key, attempts, "Stream gave up reconnecting");
            }
            None => break,
        }
    }

    debug!(stream = %key, "Stream drain stopped");
}

/// Retry every errored stream when connectivity comes back.
///
/// Streams that exhausted their retry budget wait for a manual retry; an
/// offline-to-online transition of the prober is that signal.
pub(crate) async fn retry_errored_on_recovery(
    registry: Arc<StreamRegistry>,
    mut status: watch::Receiver<ConnectivityStatus>,
    shutdown: CancellationToken,
) {
    let mut was_online = status.borrow().is_online;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let online = status.borrow_and_update().is_online;
        if online && !was_online {
            let retried = registry
                .states()
                .into_iter()
                .filter(|(_, state)| state.status == ConnectionStatus::Errored)
                .filter(|(key, _)| registry.retry(key))
                .count();
            if retried > 0 {
                info!(retried, "Connectivity restored, retrying errored streams");
            }
        }
        was_online = online;
    }
}

/// Report stream health to the prober as the transport-level network signal.
///
/// The network counts as down while some stream is retrying after a failure
/// and none is live. Errored streams are ignored: they wait for the prober to come back
/// online, so the prober must keep probing while they sit there.
pub(crate) async fn track_network_from_streams(
    registry: Arc<StreamRegistry>,
    prober: Arc<ConnectivityProber>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut available = true;

    loop {
        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            _ = tick.tick() => {}
        }

        let states = registry.states();
        let live = states.iter().any(|(_, s)| s.is_live());
        let reconnecting = states.iter().any(|(_, s)| match s.status {
            ConnectionStatus::Reconnecting => true,
            ConnectionStatus::Connecting => s.reconnect_attempts > 0,
            _ => false,
        });
        let now_available = live || !reconnecting;

        if now_available != available {
            debug!(available = now_available, live, reconnecting, "Stream network signal changed");
            prober.set_network_available(now_available);
            available = now_available;
        }
    }
}

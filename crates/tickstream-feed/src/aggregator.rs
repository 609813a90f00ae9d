//! Realtime aggregator: snapshot plus live kline stream.
//!
//! On start the aggregator fetches a bounded snapshot covering roughly 24h,
//! subscribes the kline stream for the same market, and folds every update
//! into its [`CandleSeries`]. An inactivity timer flags business-level
//! staleness independently of the connection heartbeat. Switching market is
//! a hard reset: unsubscribe, discard, re-fetch, resubscribe.

use crate::error::{FeedError, FeedResult};
use crate::series::{ApplyOutcome, CandleSeries};
use crate::snapshot::SnapshotSource;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tickstream_core::{Candle, Clock, Interval, KlineEvent, MarketEvent, StreamKey, Symbol};
use tickstream_telemetry::Metrics;
use tickstream_ws::{
    ConnectionState, ConnectionStatus, RetryConfig, StreamEvent, StreamRegistry,
    SubscriptionHandle,
};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Aggregator configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    /// No update for this long flags the series stale.
    pub inactivity_timeout_ms: u64,
    /// Bound on a snapshot fetch.
    pub snapshot_timeout_ms: u64,
    /// Re-fetch the snapshot when the stream re-opens after a drop.
    pub refetch_on_reconnect: bool,
    /// Ask the registry to reconnect when the series goes stale.
    pub reconnect_on_stale: bool,
    /// Upper bound on candles held.
    pub max_candles: usize,
    /// Retry policy for the kline stream.
    #[serde(skip)]
    pub retry: RetryConfig,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_ms: 120_000,
            snapshot_timeout_ms: 10_000,
            refetch_on_reconnect: true,
            reconnect_on_stale: false,
            max_candles: 5_000,
            retry: RetryConfig::default(),
        }
    }
}

impl AggregatorConfig {
    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_millis(self.inactivity_timeout_ms)
    }

    pub fn snapshot_timeout(&self) -> Duration {
        Duration::from_millis(self.snapshot_timeout_ms)
    }
}

/// Change notifications for consumers.
#[derive(Debug, Clone, PartialEq)]
pub enum AggregatorEvent {
    SnapshotLoaded { count: usize },
    Updated { candle: Candle, outcome: ApplyOutcome },
    /// No update within the inactivity timeout; data may be stale.
    Stale,
    /// First update after a stale period.
    Fresh,
    SnapshotFailed(String),
    ConnectionLost,
    ConnectionRestored,
}

/// Point-in-time view of an aggregator.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatorStatus {
    pub stream: String,
    pub symbol: Symbol,
    pub interval: Interval,
    pub len: usize,
    pub last_candle_time: Option<i64>,
    pub last_update: Option<DateTime<Utc>>,
    pub is_stale: bool,
    pub last_snapshot_error: Option<String>,
    pub connection: Option<ConnectionState>,
}

struct SeriesState {
    symbol: Symbol,
    interval: Interval,
    series: CandleSeries,
    last_update: Option<DateTime<Utc>>,
    is_stale: bool,
    last_snapshot_error: Option<String>,
}

impl SeriesState {
    fn key(&self) -> StreamKey {
        StreamKey::kline(self.symbol.clone(), self.interval)
    }
}

struct Inner {
    registry: Arc<StreamRegistry>,
    source: Arc<dyn SnapshotSource>,
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    state: RwLock<SeriesState>,
    events: broadcast::Sender<AggregatorEvent>,
}

/// The live subscription and its pump task.
struct MarketRun {
    handle: SubscriptionHandle,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Realtime candle series for one market.
pub struct RealtimeAggregator {
    inner: Arc<Inner>,
    run: Mutex<Option<MarketRun>>,
}

impl RealtimeAggregator {
    /// Fetch the snapshot, subscribe the kline stream and start folding.
    ///
    /// A failed snapshot does not prevent startup; it is reported through
    /// [`status`](Self::status) and [`AggregatorEvent::SnapshotFailed`].
    pub async fn start(
        registry: Arc<StreamRegistry>,
        source: Arc<dyn SnapshotSource>,
        clock: Arc<dyn Clock>,
        symbol: Symbol,
        interval: Interval,
        config: AggregatorConfig,
    ) -> FeedResult<Self> {
        let (events, _) = broadcast::channel(1024);
        let series = CandleSeries::with_max_len(config.max_candles);
        let inner = Arc::new(Inner {
            registry,
            source,
            clock,
            config,
            state: RwLock::new(SeriesState {
                symbol,
                interval,
                series,
                last_update: None,
                is_stale: false,
                last_snapshot_error: None,
            }),
            events,
        });

        let aggregator = Self {
            inner,
            run: Mutex::new(None),
        };
        let run = aggregator.open_market().await?;
        *aggregator.run.lock().await = Some(run);
        Ok(aggregator)
    }

    /// Snapshot then subscribe, in that order.
    async fn open_market(&self) -> FeedResult<MarketRun> {
        let key = self.inner.state.read().key();
        info!(stream = %key, "Starting realtime series");

        let _ = self.inner.fetch_snapshot().await;

        let sub = self
            .inner
            .registry
            .subscribe(key.clone(), self.inner.config.retry.clone())?;
        let cancel = CancellationToken::new();
        let task = tokio::spawn(pump(
            Arc::clone(&self.inner),
            key,
            sub.events,
            cancel.clone(),
        ));

        Ok(MarketRun {
            handle: sub.handle,
            cancel,
            task,
        })
    }

    async fn close_market(&self, run: MarketRun) {
        run.cancel.cancel();
        self.inner.registry.unsubscribe(&run.handle).await;
        let _ = run.task.await;
    }

    /// Hard reset onto another market.
    pub async fn change_market(&self, symbol: Symbol, interval: Interval) -> FeedResult<()> {
        let mut run = self.run.lock().await;
        if let Some(old) = run.take() {
            self.close_market(old).await;
        }

        {
            let mut state = self.inner.state.write();
            let old_key = state.key();
            Metrics::series_len(&old_key.stream_name(), 0);
            Metrics::series_stale(&old_key.stream_name(), false);
            info!(from = %old_key, %symbol, %interval, "Changing market");

            state.symbol = symbol;
            state.interval = interval;
            state.series.clear();
            state.last_update = None;
            state.is_stale = false;
            state.last_snapshot_error = None;
        }

        *run = Some(self.open_market().await?);
        Ok(())
    }

    /// Stop folding and close the stream.
    pub async fn stop(&self) {
        if let Some(old) = self.run.lock().await.take() {
            self.close_market(old).await;
            info!(stream = %self.key(), "Realtime series stopped");
        }
    }

    /// Fold one candle into the series.
    pub fn on_update(&self, candle: Candle) -> ApplyOutcome {
        self.inner.on_update(candle)
    }

    /// Ask the registry to reconnect the stream, and re-fetch the snapshot
    /// if the last fetch failed.
    pub async fn reconnect(&self) -> FeedResult<()> {
        if self.run.lock().await.is_none() {
            return Err(FeedError::Stopped);
        }

        let key = self.key();
        self.inner.registry.retry(&key);
        let failed = self.inner.state.read().last_snapshot_error.is_some();
        if failed {
            self.inner.fetch_snapshot().await?;
        }
        Ok(())
    }

    /// Re-fetch the snapshot now.
    pub async fn refresh_snapshot(&self) -> FeedResult<usize> {
        self.inner.fetch_snapshot().await
    }

    pub fn key(&self) -> StreamKey {
        self.inner.state.read().key()
    }

    /// Ordered copy of the series.
    pub fn series(&self) -> Vec<Candle> {
        self.inner.state.read().series.candles().to_vec()
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<AggregatorEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_stale(&self) -> bool {
        self.inner.state.read().is_stale
    }

    pub fn status(&self) -> AggregatorStatus {
        let state = self.inner.state.read();
        let key = state.key();
        AggregatorStatus {
            stream: key.stream_name(),
            symbol: state.symbol.clone(),
            interval: state.interval,
            len: state.series.len(),
            last_candle_time: state.series.last().map(|c| c.time),
            last_update: state.last_update,
            is_stale: state.is_stale,
            last_snapshot_error: state.last_snapshot_error.clone(),
            connection: self.inner.registry.connection_state(&key),
        }
    }
}

impl Inner {
    fn emit(&self, event: AggregatorEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    async fn fetch_snapshot(&self) -> FeedResult<usize> {
        let (symbol, interval) = {
            let state = self.state.read();
            (state.symbol.clone(), state.interval)
        };
        let label = StreamKey::kline(symbol.clone(), interval).stream_name();
        let limit = interval.snapshot_limit();
        let timeout = self.config.snapshot_timeout();

        let result = match tokio::time::timeout(
            timeout,
            self.source.fetch_candles(&symbol, interval, limit),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(FeedError::SnapshotTimeout(timeout)),
        };

        let mut state = self.state.write();
        if state.symbol != symbol || state.interval != interval {
            debug!(stream = %label, "Discarding snapshot for previous market");
            return Err(FeedError::Stopped);
        }

        match result {
            Ok(candles) => {
                let count = candles.len();
                state.series.merge_snapshot(candles);
                state.last_snapshot_error = None;
                Metrics::series_len(&label, state.series.len());
                drop(state);

                info!(stream = %label, count, "Snapshot loaded");
                self.emit(AggregatorEvent::SnapshotLoaded { count });
                Ok(count)
            }
            Err(e) => {
                state.last_snapshot_error = Some(e.to_string());
                drop(state);

                warn!(stream = %label, error = %e, "Snapshot fetch failed");
                Metrics::snapshot_error(&label);
                self.emit(AggregatorEvent::SnapshotFailed(e.to_string()));
                Err(e)
            }
        }
    }

    /// Fold a kline event if it belongs to this market.
    fn on_kline(&self, kline: &KlineEvent) -> ApplyOutcome {
        {
            let state = self.state.read();
            if kline.symbol != state.symbol || kline.interval != state.interval {
                debug!(symbol = %kline.symbol, interval = %kline.interval, "Ignoring kline for another market");
                return ApplyOutcome::Ignored;
            }
        }
        self.on_update(kline.candle)
    }

    fn on_update(&self, candle: Candle) -> ApplyOutcome {
        let now = self.clock.now();
        let (outcome, was_stale, label, len) = {
            let mut state = self.state.write();
            let outcome = state.series.apply(candle);
            if outcome == ApplyOutcome::Ignored {
                return outcome;
            }
            state.last_update = Some(now);
            let was_stale = std::mem::replace(&mut state.is_stale, false);
            (outcome, was_stale, state.key().stream_name(), state.series.len())
        };

        Metrics::series_len(&label, len);
        if was_stale {
            info!(stream = %label, "Series fresh again");
            Metrics::series_stale(&label, false);
            self.emit(AggregatorEvent::Fresh);
        }
        self.emit(AggregatorEvent::Updated { candle, outcome });
        outcome
    }

    fn mark_stale(&self, key: &StreamKey) {
        let last_update = {
            let mut state = self.state.write();
            if state.is_stale {
                return;
            }
            state.is_stale = true;
            state.last_update
        };

        warn!(stream = %key, ?last_update, "No updates within inactivity timeout, data may be stale");
        Metrics::series_stale(&key.stream_name(), true);
        self.emit(AggregatorEvent::Stale);

        if self.config.reconnect_on_stale {
            info!(stream = %key, "Requesting reconnect for stale series");
            self.registry.retry(key);
        }
    }
}

/// Fold stream events until cancelled or the subscription ends.
async fn pump(
    inner: Arc<Inner>,
    key: StreamKey,
    mut events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
) {
    let inactivity = inner.config.inactivity_timeout();
    let mut deadline = Instant::now() + inactivity;
    let mut has_connected = false;
    let mut connected = false;

    loop {
        let stale = inner.state.read().is_stale;

        tokio::select! {
            biased;

            () = cancel.cancelled() => break,

            event = events.recv() => {
                let Some(event) = event else {
                    debug!(stream = %key, "Stream subscription ended");
                    break;
                };

                match event {
                    StreamEvent::Data(MarketEvent::Kline(kline)) => {
                        if inner.on_kline(&kline) != ApplyOutcome::Ignored {
                            deadline = Instant::now() + inactivity;
                        }
                    }
                    StreamEvent::Data(_) => {}
                    StreamEvent::StateChanged(ConnectionStatus::Connected) => {
                        let reopened = has_connected;
                        has_connected = true;
                        connected = true;
                        if reopened {
                            info!(stream = %key, "Stream restored");
                            inner.emit(AggregatorEvent::ConnectionRestored);
                            if inner.config.refetch_on_reconnect {
                                let _ = inner.fetch_snapshot().await;
                            }
                        }
                    }
                    StreamEvent::StateChanged(
                        ConnectionStatus::Reconnecting | ConnectionStatus::Errored,
                    ) => {
                        if std::mem::replace(&mut connected, false) {
                            warn!(stream = %key, "Stream connection lost");
                            inner.emit(AggregatorEvent::ConnectionLost);
                        }
                    }
                    StreamEvent::StateChanged(_) => {}
                    StreamEvent::Error(e) => {
                        debug!(stream = %key, error = %e, "Stream error");
                    }
                    StreamEvent::MaxRetriesReached { attempts } => {
                        warn!(stream = %key, attempts, "Stream gave up reconnecting");
                    }
                }
            }

            () = tokio::time::sleep_until(deadline), if !stale => {
                inner.mark_stale(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::MockSnapshotSource;
    use async_trait::async_trait;
    use rust_decimal::Decimal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tickstream_core::{ManualClock, Price, Size};
    use tickstream_ws::{
        CloseReason, Frame, RegistryConfig, Transport, TransportSession, WsResult,
    };

    /// Transport whose sessions are fed by the test.
    #[derive(Default)]
    struct ScriptTransport {
        opens: AtomicUsize,
        sessions: parking_lot::Mutex<Vec<(mpsc::UnboundedSender<Frame>, Arc<parking_lot::Mutex<Option<CloseReason>>>)>>,
    }

    impl ScriptTransport {
        fn push(&self, session: usize, frame: Frame) {
            let _ = self.sessions.lock()[session].0.send(frame);
        }

        fn closed_with(&self, session: usize) -> Option<CloseReason> {
            *self.sessions.lock()[session].1.lock()
        }

        fn open_count(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    struct ScriptSession {
        frames: mpsc::UnboundedReceiver<Frame>,
        closed: Arc<parking_lot::Mutex<Option<CloseReason>>>,
    }

    #[async_trait]
    impl Transport for ScriptTransport {
        async fn open(&self, _stream_name: &str) -> WsResult<Box<dyn TransportSession>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            let (tx, rx) = mpsc::unbounded_channel();
            let closed = Arc::new(parking_lot::Mutex::new(None));
            self.sessions.lock().push((tx, Arc::clone(&closed)));
            Ok(Box::new(ScriptSession { frames: rx, closed }))
        }
    }

    #[async_trait]
    impl TransportSession for ScriptSession {
        async fn next_frame(&mut self) -> Option<WsResult<Frame>> {
            self.frames.recv().await.map(Ok)
        }

        async fn pong(&mut self, _payload: Vec<u8>) -> WsResult<()> {
            Ok(())
        }

        async fn close(&mut self, reason: CloseReason) -> WsResult<()> {
            *self.closed.lock() = Some(reason);
            Ok(())
        }
    }

    fn candle(time: i64, close: i64) -> Candle {
        let p = Price::new(Decimal::from(close));
        Candle::new(time, p, p, p, p, Size::new(Decimal::ONE))
    }

    fn kline(symbol: &str, open_time_s: i64, close: i64) -> Frame {
        Frame::Text(format!(
            r#"{{"e":"kline","E":{e},"s":"{symbol}","k":{{"t":{t},"i":"1m","o":"1","h":"1","l":"1","c":"{close}","v":"1","x":false}}}}"#,
            e = open_time_s * 1000 + 500,
            t = open_time_s * 1000,
        ))
    }

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT").unwrap()
    }

    fn quiet_config() -> AggregatorConfig {
        AggregatorConfig {
            // Keep the connection heartbeat out of the way
            retry: RetryConfig {
                heartbeat_interval_ms: 3_600_000,
                stale_timeout_ms: 7_200_000,
                ..RetryConfig::default()
            },
            ..AggregatorConfig::default()
        }
    }

    struct Harness {
        transport: Arc<ScriptTransport>,
        registry: Arc<StreamRegistry>,
    }

    fn harness() -> Harness {
        let transport = Arc::new(ScriptTransport::default());
        let registry = Arc::new(StreamRegistry::with_transport(
            RegistryConfig::default(),
            Arc::clone(&transport) as Arc<dyn Transport>,
            Arc::new(ManualClock::new(1_700_000_000_000)),
        ));
        Harness {
            transport,
            registry,
        }
    }

    async fn start(
        h: &Harness,
        source: MockSnapshotSource,
        config: AggregatorConfig,
    ) -> RealtimeAggregator {
        RealtimeAggregator::start(
            Arc::clone(&h.registry),
            Arc::new(source),
            Arc::new(ManualClock::new(1_700_000_000_000)),
            btc(),
            Interval::M1,
            config,
        )
        .await
        .unwrap()
    }

    async fn next(rx: &mut broadcast::Receiver<AggregatorEvent>) -> AggregatorEvent {
        tokio::time::timeout(Duration::from_secs(3600), rx.recv())
            .await
            .expect("timed out waiting for aggregator event")
            .expect("aggregator event channel closed")
    }

    async fn wait_for(
        rx: &mut broadcast::Receiver<AggregatorEvent>,
        pred: impl Fn(&AggregatorEvent) -> bool,
    ) -> AggregatorEvent {
        loop {
            let event = next(rx).await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Let the connection task open its session.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn snapshot_source(candles: Vec<Candle>, times: usize) -> MockSnapshotSource {
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_candles()
            .withf(|symbol, interval, limit| {
                symbol.as_str() == "BTCUSDT" && *interval == Interval::M1 && *limit == 1000
            })
            .times(times)
            .returning(move |_, _, _| Ok(candles.clone()));
        source
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_then_live_fold() {
        let h = harness();
        let source = snapshot_source(vec![candle(0, 1), candle(60, 2), candle(120, 3)], 1);
        let agg = start(&h, source, quiet_config()).await;
        assert_eq!(agg.series().len(), 3);

        let mut rx = agg.subscribe_updates();
        settle().await;

        h.transport.push(0, kline("BTCUSDT", 120, 4));
        h.transport.push(0, kline("BTCUSDT", 180, 5));
        h.transport.push(0, kline("BTCUSDT", 60, 9));
        h.transport.push(0, kline("ETHUSDT", 240, 7));
        h.transport.push(0, kline("BTCUSDT", 180, 6));

        let outcomes = [
            ApplyOutcome::Replaced,
            ApplyOutcome::Appended,
            ApplyOutcome::Replaced,
        ];
        for expected in outcomes {
            let AggregatorEvent::Updated { outcome, .. } = next(&mut rx).await else {
                panic!("expected update");
            };
            assert_eq!(outcome, expected);
        }

        let series = agg.series();
        let times: Vec<_> = series.iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0, 60, 120, 180]);
        assert_eq!(series[1].close.to_string(), "2");
        assert_eq!(series[2].close.to_string(), "4");
        assert_eq!(series[3].close.to_string(), "6");

        let status = agg.status();
        assert_eq!(status.stream, "btcusdt@kline_1m");
        assert_eq!(status.len, 4);
        assert_eq!(status.last_candle_time, Some(180));
        assert!(status.last_update.is_some());
        assert_eq!(
            status.connection.map(|c| c.status),
            Some(ConnectionStatus::Connected)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_for_last_candle_replaces_in_full_snapshot() {
        let h = harness();
        let snapshot: Vec<Candle> = (1..=100).map(|i| candle(i * 10, 100)).collect();
        let agg = start(&h, snapshot_source(snapshot, 1), quiet_config()).await;
        assert_eq!(agg.series().len(), 100);
        assert_eq!(agg.series().last().map(|c| c.time), Some(1000));

        assert_eq!(agg.on_update(candle(1000, 105)), ApplyOutcome::Replaced);

        let series = agg.series();
        assert_eq!(series.len(), 100);
        assert_eq!(series[99].time, 1000);
        assert_eq!(series[99].close.to_string(), "105");
        assert_eq!(series[98].close.to_string(), "100");

        // Same result when the update arrives over the stream
        let mut rx = agg.subscribe_updates();
        settle().await;
        h.transport.push(0, kline("BTCUSDT", 1000, 106));
        let AggregatorEvent::Updated { outcome, .. } = next(&mut rx).await else {
            panic!("expected update");
        };
        assert_eq!(outcome, ApplyOutcome::Replaced);
        assert_eq!(agg.series().len(), 100);
        assert_eq!(agg.status().last_candle_time, Some(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_inactivity_flags_stale_without_reconnect() {
        let h = harness();
        let agg = start(&h, snapshot_source(vec![candle(0, 1)], 1), quiet_config()).await;
        let mut rx = agg.subscribe_updates();
        settle().await;

        tokio::time::sleep(Duration::from_secs(119)).await;
        assert!(!agg.is_stale());

        assert_eq!(next(&mut rx).await, AggregatorEvent::Stale);
        assert!(agg.is_stale());
        assert!(agg.status().is_stale);
        assert_eq!(h.transport.open_count(), 1);

        h.transport.push(0, kline("BTCUSDT", 60, 2));
        assert_eq!(next(&mut rx).await, AggregatorEvent::Fresh);
        assert!(matches!(next(&mut rx).await, AggregatorEvent::Updated { .. }));
        assert!(!agg.is_stale());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_on_stale_when_enabled() {
        let h = harness();
        let config = AggregatorConfig {
            reconnect_on_stale: true,
            refetch_on_reconnect: false,
            ..quiet_config()
        };
        let agg = start(&h, snapshot_source(vec![candle(0, 1)], 1), config).await;
        let mut rx = agg.subscribe_updates();
        settle().await;

        wait_for(&mut rx, |e| *e == AggregatorEvent::Stale).await;
        wait_for(&mut rx, |e| *e == AggregatorEvent::ConnectionRestored).await;
        assert_eq!(h.transport.open_count(), 2);
        assert_eq!(h.transport.closed_with(0), Some(CloseReason::MANUAL_RECONNECT));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetch_snapshot_after_reconnect() {
        let h = harness();
        let agg = start(&h, snapshot_source(vec![candle(0, 1), candle(60, 1)], 2), quiet_config()).await;
        let mut rx = agg.subscribe_updates();
        settle().await;

        h.transport.push(0, kline("BTCUSDT", 120, 3));
        h.transport.push(
            0,
            Frame::Close {
                code: 1006,
                reason: "abnormal".to_string(),
            },
        );

        wait_for(&mut rx, |e| *e == AggregatorEvent::ConnectionLost).await;
        assert_eq!(next(&mut rx).await, AggregatorEvent::ConnectionRestored);
        assert_eq!(next(&mut rx).await, AggregatorEvent::SnapshotLoaded { count: 2 });

        // Live candle newer than the snapshot survives the refetch
        let times: Vec<_> = agg.series().iter().map(|c| c.time).collect();
        assert_eq!(times, vec![0, 60, 120]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_snapshot_retried_on_reconnect() {
        let h = harness();
        let mut source = MockSnapshotSource::new();
        let mut seq = mockall::Sequence::new();
        source
            .expect_fetch_candles()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Err(FeedError::SnapshotFetch("HTTP 503".to_string())));
        source
            .expect_fetch_candles()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(vec![candle(0, 1)]));
        let config = AggregatorConfig {
            refetch_on_reconnect: false,
            ..quiet_config()
        };

        let agg = start(&h, source, config).await;
        let status = agg.status();
        assert_eq!(status.len, 0);
        assert!(status.last_snapshot_error.unwrap().contains("503"));

        agg.reconnect().await.unwrap();
        let status = agg.status();
        assert_eq!(status.len, 1);
        assert!(status.last_snapshot_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_timeout_reported() {
        struct Hanging;

        #[async_trait]
        impl SnapshotSource for Hanging {
            async fn fetch_candles(
                &self,
                _symbol: &Symbol,
                _interval: Interval,
                _limit: u32,
            ) -> FeedResult<Vec<Candle>> {
                std::future::pending().await
            }
        }

        let h = harness();
        let agg = RealtimeAggregator::start(
            Arc::clone(&h.registry),
            Arc::new(Hanging),
            Arc::new(ManualClock::new(0)),
            btc(),
            Interval::M1,
            quiet_config(),
        )
        .await
        .unwrap();

        assert!(agg
            .status()
            .last_snapshot_error
            .unwrap()
            .contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_market_is_hard_reset() {
        let h = harness();
        let mut source = MockSnapshotSource::new();
        source
            .expect_fetch_candles()
            .returning(|symbol, interval, limit| {
                let base = if symbol.as_str() == "BTCUSDT" { 1 } else { 100 };
                assert_eq!(limit, interval.snapshot_limit());
                Ok(vec![candle(0, base), candle(300, base)])
            });
        let agg = start(&h, source, quiet_config()).await;
        settle().await;
        h.transport.push(0, kline("BTCUSDT", 600, 2));
        settle().await;
        assert_eq!(agg.series().len(), 3);

        let eth = Symbol::new("ETHUSDT").unwrap();
        agg.change_market(eth.clone(), Interval::M5).await.unwrap();
        settle().await;

        let expected = StreamKey::kline(eth, Interval::M5);
        assert_eq!(agg.key(), expected);
        assert_eq!(h.registry.active_streams(), vec![expected]);
        assert_eq!(h.transport.closed_with(0), Some(CloseReason::MANUAL));

        // Nothing carried over from the previous market
        let closes: Vec<_> = agg.series().iter().map(|c| c.close.to_string()).collect();
        assert_eq!(closes, vec!["100", "100"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_unsubscribes() {
        let h = harness();
        let agg = start(&h, snapshot_source(vec![], 1), quiet_config()).await;
        settle().await;

        agg.stop().await;
        assert!(h.registry.is_empty());
        assert!(matches!(agg.reconnect().await, Err(FeedError::Stopped)));
    }
}

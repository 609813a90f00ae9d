//! Prometheus metrics for tickstream.
//!
//! Covers:
//! - Per-stream connection state and reconnects
//! - Frame throughput, protocol errors and feed latency
//! - Connectivity probe latency and quality
//! - Realtime series length, staleness and snapshot failures
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. If registration fails,
//! it indicates a fatal configuration error (e.g., duplicate metric names)
//! that should cause an immediate crash at startup rather than silent failure.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram,
    register_histogram_vec, CounterVec, Encoder, Gauge, GaugeVec, Histogram, HistogramVec,
    TextEncoder,
};

/// Connection states exported on `tickstream_ws_state`.
const WS_STATES: [&str; 5] = [
    "connecting",
    "connected",
    "disconnected",
    "reconnecting",
    "errored",
];

/// Per-stream connection state (1 = connected, 0 = not connected).
pub static WS_CONNECTED: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_ws_connected",
        "Stream connection state (1=connected)",
        &["stream"]
    )
    .unwrap()
});

/// Per-stream state machine current state.
/// Labels: stream, state (connecting/connected/disconnected/reconnecting/errored)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_ws_state",
        "Stream state machine current state (1=active, 0=inactive)",
        &["stream", "state"]
    )
    .unwrap()
});

/// Total reconnection attempts.
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_reconnect_total",
        "Total stream reconnection attempts",
        &["stream", "reason"]
    )
    .unwrap()
});

/// Total decoded frames.
pub static WS_FRAMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_frames_total",
        "Total decoded stream frames",
        &["stream", "kind"]
    )
    .unwrap()
});

/// Total frames dropped by the codec.
pub static WS_PROTOCOL_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_protocol_errors_total",
        "Total malformed or unrecognized frames dropped",
        &["stream"]
    )
    .unwrap()
});

/// Total streams that exhausted their retry budget.
pub static WS_MAX_RETRIES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_ws_max_retries_total",
        "Total times a stream gave up reconnecting",
        &["stream"]
    )
    .unwrap()
});

/// Feed latency in milliseconds (event time to receive time).
pub static FEED_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "tickstream_feed_latency_ms",
        "Feed message latency in milliseconds",
        &["stream"],
        vec![1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 5000.0]
    )
    .unwrap()
});

/// Connectivity probe round-trip latency.
pub static PROBE_LATENCY_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "tickstream_probe_latency_ms",
        "Connectivity probe round-trip latency in milliseconds",
        vec![10.0, 25.0, 50.0, 100.0, 200.0, 300.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Connectivity quality (0=unknown, 1=offline, 2=poor, 3=good, 4=excellent).
pub static CONNECTIVITY_QUALITY: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "tickstream_connectivity_quality",
        "Connectivity quality (0=unknown,1=offline,2=poor,3=good,4=excellent)"
    )
    .unwrap()
});

/// Realtime series length.
pub static SERIES_LEN: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_series_len",
        "Number of candles held by a realtime series",
        &["series"]
    )
    .unwrap()
});

/// Realtime series staleness (1 = stale).
pub static SERIES_STALE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "tickstream_series_stale",
        "Realtime series inactivity flag (1=stale)",
        &["series"]
    )
    .unwrap()
});

/// Snapshot fetch failures.
pub static SNAPSHOT_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "tickstream_snapshot_errors_total",
        "Total historical snapshot fetch failures",
        &["series"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set stream state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn ws_state_set(stream: &str, state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[stream, s]).set(0.0);
        }
        WS_STATE.with_label_values(&[stream, state]).set(1.0);

        let connected = if state == "connected" { 1.0 } else { 0.0 };
        WS_CONNECTED.with_label_values(&[stream]).set(connected);
    }

    /// Drop all state series for a stream that was unsubscribed.
    pub fn ws_stream_removed(stream: &str) {
        for s in WS_STATES {
            let _ = WS_STATE.remove_label_values(&[stream, s]);
        }
        let _ = WS_CONNECTED.remove_label_values(&[stream]);
    }

    /// Record a reconnection attempt.
    pub fn ws_reconnect(stream: &str, reason: &str) {
        WS_RECONNECT_TOTAL
            .with_label_values(&[stream, reason])
            .inc();
    }

    /// Record a decoded frame.
    pub fn ws_frame(stream: &str, kind: &str) {
        WS_FRAMES_TOTAL.with_label_values(&[stream, kind]).inc();
    }

    /// Record a dropped frame.
    pub fn ws_protocol_error(stream: &str) {
        WS_PROTOCOL_ERRORS_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Record a stream giving up.
    pub fn ws_max_retries(stream: &str) {
        WS_MAX_RETRIES_TOTAL.with_label_values(&[stream]).inc();
    }

    /// Record feed latency.
    pub fn feed_latency(stream: &str, latency_ms: f64) {
        FEED_LATENCY_MS
            .with_label_values(&[stream])
            .observe(latency_ms);
    }

    /// Record a successful probe.
    pub fn probe_latency(latency_ms: f64) {
        PROBE_LATENCY_MS.observe(latency_ms);
    }

    /// Set connectivity quality level.
    pub fn connectivity_quality(level: f64) {
        CONNECTIVITY_QUALITY.set(level);
    }

    /// Set series length.
    pub fn series_len(series: &str, len: usize) {
        SERIES_LEN.with_label_values(&[series]).set(len as f64);
    }

    /// Set series staleness.
    pub fn series_stale(series: &str, stale: bool) {
        SERIES_STALE
            .with_label_values(&[series])
            .set(if stale { 1.0 } else { 0.0 });
    }

    /// Record a snapshot failure.
    pub fn snapshot_error(series: &str) {
        SNAPSHOT_ERRORS_TOTAL.with_label_values(&[series]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let encoder = TextEncoder::new();
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

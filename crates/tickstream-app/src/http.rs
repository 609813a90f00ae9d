//! Read-only HTTP status surface using axum.
//!
//! - `GET /health`: connectivity status
//! - `GET /streams`: every live stream's connection state
//! - `GET /series`: status of each realtime series
//! - `GET /metrics`: Prometheus text exposition

use std::sync::Arc;

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use tickstream_connectivity::{ConnectivityProber, ConnectivityStatus};
use tickstream_feed::{AggregatorStatus, RealtimeAggregator};
use tickstream_telemetry::Metrics;
use tickstream_ws::{ConnectionState, StreamRegistry};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    registry: Arc<StreamRegistry>,
    prober: Arc<ConnectivityProber>,
    aggregators: Arc<Vec<Arc<RealtimeAggregator>>>,
}

impl AppState {
    pub fn new(
        registry: Arc<StreamRegistry>,
        prober: Arc<ConnectivityProber>,
        aggregators: Vec<Arc<RealtimeAggregator>>,
    ) -> Self {
        Self {
            registry,
            prober,
            aggregators: Arc::new(aggregators),
        }
    }
}

/// One row of `GET /streams`.
#[derive(Debug, Serialize)]
pub struct StreamView {
    pub stream: String,
    #[serde(flatten)]
    pub state: ConnectionState,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/streams", get(get_streams))
        .route("/series", get(get_series))
        .route("/metrics", get(get_metrics))
        .with_state(state)
}

async fn get_health(State(state): State<AppState>) -> Json<ConnectivityStatus> {
    Json(state.prober.status())
}

async fn get_streams(State(state): State<AppState>) -> Json<Vec<StreamView>> {
    let streams = state
        .registry
        .states()
        .into_iter()
        .map(|(key, state)| StreamView {
            stream: key.stream_name(),
            state,
        })
        .collect();
    Json(streams)
}

async fn get_series(State(state): State<AppState>) -> Json<Vec<AggregatorStatus>> {
    Json(state.aggregators.iter().map(|a| a.status()).collect())
}

async fn get_metrics() -> Response {
    match Metrics::gather_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to render metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

/// Serve until `shutdown` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "Status server listening");
    }

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use tickstream_connectivity::{ConnectivityResult, LatencyProbe, ProberConfig};
    use tickstream_ws::RegistryConfig;

    struct InstantProbe;

    #[async_trait]
    impl LatencyProbe for InstantProbe {
        async fn probe(&self) -> ConnectivityResult<()> {
            Ok(())
        }
    }

    async fn spawn_server() -> (String, CancellationToken, Arc<ConnectivityProber>) {
        let registry = Arc::new(StreamRegistry::new(RegistryConfig::default()));
        let prober = Arc::new(ConnectivityProber::new(
            Arc::new(InstantProbe),
            ProberConfig::default(),
        ));
        let state = AppState::new(registry, Arc::clone(&prober), Vec::new());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state, shutdown.clone()));
        (url, shutdown, prober)
    }

    #[tokio::test]
    async fn test_health_reports_connectivity() {
        let (url, shutdown, prober) = spawn_server().await;
        prober.probe_once().await;

        let body: serde_json::Value = reqwest::get(format!("{url}/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["is_online"], true);
        assert_eq!(body["quality"], "excellent");

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_streams_and_series_empty() {
        let (url, shutdown, _) = spawn_server().await;

        let streams: Vec<serde_json::Value> = reqwest::get(format!("{url}/streams"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(streams.is_empty());

        let series: Vec<serde_json::Value> = reqwest::get(format!("{url}/series"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert!(series.is_empty());

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_metrics_text() {
        let (url, shutdown, _) = spawn_server().await;
        Metrics::connectivity_quality(4.0);

        let response = reqwest::get(format!("{url}/metrics")).await.unwrap();
        assert_eq!(response.status(), 200);
        let text = response.text().await.unwrap();
        assert!(text.contains("tickstream_connectivity_quality"));

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let registry = Arc::new(StreamRegistry::new(RegistryConfig::default()));
        let prober = Arc::new(ConnectivityProber::new(
            Arc::new(InstantProbe),
            ProberConfig::default(),
        ));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let shutdown = CancellationToken::new();
        let server = tokio::spawn(serve(
            listener,
            AppState::new(registry, prober, Vec::new()),
            shutdown.clone(),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}

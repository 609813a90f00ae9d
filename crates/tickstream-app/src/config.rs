//! Application configuration.

use crate::error::{AppError, AppResult};
use serde::Deserialize;
use std::time::Duration;
use tickstream_connectivity::ProberConfig;
use tickstream_core::{Interval, StreamKey, Symbol};
use tickstream_feed::AggregatorConfig;
use tickstream_ws::{RegistryConfig, RetryConfig};

/// WebSocket configuration shared by every stream.
#[derive(Debug, Clone, Deserialize)]
pub struct WsConfig {
    /// Default retry and heartbeat settings for each subscription.
    #[serde(flatten)]
    pub retry: RetryConfig,
    /// Bound on the open handshake (ms).
    #[serde(default = "default_open_timeout_ms")]
    pub open_timeout_ms: u64,
    /// Per-subscription event channel capacity.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

fn default_open_timeout_ms() -> u64 {
    10_000
}

fn default_event_buffer() -> usize {
    1024
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            open_timeout_ms: default_open_timeout_ms(),
            event_buffer: default_event_buffer(),
        }
    }
}

/// One realtime candle series to maintain.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChartConfig {
    pub symbol: Symbol,
    pub interval: Interval,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    /// HTTP status and metrics port. 0 disables the server.
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    /// Default log filter, used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Period of the status summary log line (ms). 0 disables it.
    #[serde(default = "default_status_log_interval_ms")]
    pub status_log_interval_ms: u64,
}

fn default_http_port() -> u16 {
    9090
}

fn default_log_level() -> String {
    "info,tickstream=debug".to_string()
}

fn default_status_log_interval_ms() -> u64 {
    60_000
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            log_level: default_log_level(),
            status_log_interval_ms: default_status_log_interval_ms(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_ws_base_url")]
    pub ws_base_url: String,
    #[serde(default = "default_rest_base_url")]
    pub rest_base_url: String,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub prober: ProberConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub charts: Vec<ChartConfig>,
    /// Raw stream names, e.g. `ethusdt@trade`.
    #[serde(default)]
    pub streams: Vec<String>,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_ws_base_url() -> String {
    "wss://stream.binance.com:9443/ws".to_string()
}

fn default_rest_base_url() -> String {
    "https://api.binance.com".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ws_base_url: default_ws_base_url(),
            rest_base_url: default_rest_base_url(),
            websocket: WsConfig::default(),
            prober: ProberConfig::default(),
            aggregator: AggregatorConfig::default(),
            charts: Vec::new(),
            streams: Vec::new(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config {path}: {e}")))?;

        let config = Self::from_toml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse without validating.
    pub fn from_toml(content: &str) -> AppResult<Self> {
        toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.ws_base_url.trim().is_empty() {
            return Err(AppError::Config("ws_base_url is empty".to_string()));
        }
        if self.rest_base_url.trim().is_empty() {
            return Err(AppError::Config("rest_base_url is empty".to_string()));
        }
        self.websocket
            .retry
            .validate()
            .map_err(|e| AppError::Config(format!("[websocket] {e}")))?;
        if self.websocket.event_buffer == 0 {
            return Err(AppError::Config(
                "[websocket] event_buffer must be > 0".to_string(),
            ));
        }
        if self.prober.interval_ms == 0 {
            return Err(AppError::Config(
                "[prober] interval_ms must be > 0".to_string(),
            ));
        }
        self.stream_keys()?;
        Ok(())
    }

    /// Parse the raw `streams` list.
    pub fn stream_keys(&self) -> AppResult<Vec<StreamKey>> {
        self.streams
            .iter()
            .map(|name| {
                name.parse::<StreamKey>()
                    .map_err(|e| AppError::Config(format!("Invalid stream {name:?}: {e}")))
            })
            .collect()
    }

    pub fn registry_config(&self) -> RegistryConfig {
        RegistryConfig {
            ws_base_url: self.ws_base_url.clone(),
            open_timeout: Duration::from_millis(self.websocket.open_timeout_ms),
            event_buffer: self.websocket.event_buffer,
            ..RegistryConfig::default()
        }
    }

    /// Aggregator settings with the shared stream retry policy applied.
    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            retry: self.websocket.retry.clone(),
            ..self.aggregator.clone()
        }
    }
}

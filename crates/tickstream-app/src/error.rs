//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tickstream_ws::WsError),

    #[error("REST error: {0}")]
    Rest(#[from] tickstream_rest::RestError),

    #[error("Feed error: {0}")]
    Feed(#[from] tickstream_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] tickstream_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;

//! WebSocket error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WsError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Open handshake timed out after {0:?}")]
    OpenTimeout(Duration),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Stale connection: no frame for {silent_ms}ms")]
    StaleConnection { silent_ms: u64 },

    #[error("Max retries exceeded after {attempts} attempts")]
    MaxRetriesExceeded { attempts: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Registry is shut down")]
    Shutdown,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl WsError {
    /// Short label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) | Self::Tungstenite(_) => "transport",
            Self::ConnectionClosed { .. } => "closed",
            Self::OpenTimeout(_) => "open_timeout",
            Self::Protocol(_) | Self::Json(_) => "protocol",
            Self::StaleConnection { .. } => "heartbeat_timeout",
            Self::MaxRetriesExceeded { .. } => "max_retries",
            Self::InvalidConfig(_) => "config",
            Self::Shutdown => "shutdown",
        }
    }

    /// Whether this error ends a session and feeds the reconnection policy.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            Self::Transport(_)
                | Self::Tungstenite(_)
                | Self::ConnectionClosed { .. }
                | Self::OpenTimeout(_)
                | Self::StaleConnection { .. }
        )
    }
}

pub type WsResult<T> = Result<T, WsError>;

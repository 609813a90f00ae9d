//! Transport seam between connection tasks and the network.
//!
//! [`Transport`] opens one session per stream; [`TungsteniteTransport`] is
//! the production implementation over `tokio-tungstenite`.

use crate::error::{WsError, WsResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

/// Inbound frame, reduced to what the connection task needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Ping(Vec<u8>),
    Pong,
    Close { code: u16, reason: String },
}

/// Close code and reason sent when the client ends a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseReason {
    pub code: u16,
    pub reason: &'static str,
}

impl CloseReason {
    /// Unsubscribe or shutdown.
    pub const MANUAL: Self = Self {
        code: 1000,
        reason: "manual",
    };
    /// Consumer-requested reconnect.
    pub const MANUAL_RECONNECT: Self = Self {
        code: 1000,
        reason: "manual reconnect",
    };
    /// Heartbeat detected a silent transport.
    pub const HEARTBEAT_TIMEOUT: Self = Self {
        code: 4000,
        reason: "heartbeat timeout",
    };
}

/// Opens transport sessions for named streams.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, stream_name: &str) -> WsResult<Box<dyn TransportSession>>;
}

/// One open transport session.
#[async_trait]
pub trait TransportSession: Send {
    /// Next inbound frame; `None` once the stream has ended.
    async fn next_frame(&mut self) -> Option<WsResult<Frame>>;

    async fn pong(&mut self, payload: Vec<u8>) -> WsResult<()>;

    async fn close(&mut self, reason: CloseReason) -> WsResult<()>;
}

/// WebSocket transport connecting to `{base_url}/{stream_name}`.
#[derive(Debug, Clone)]
pub struct TungsteniteTransport {
    base_url: String,
}

impl TungsteniteTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
        }
    }

    pub fn url_for(&self, stream_name: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), stream_name)
    }
}

#[async_trait]
impl Transport for TungsteniteTransport {
    async fn open(&self, stream_name: &str) -> WsResult<Box<dyn TransportSession>> {
        let url = self.url_for(stream_name);
        info!(%url, "Connecting to WebSocket");

        // TCP_NODELAY for lower latency
        let (stream, _response) = connect_async_tls_with_config(url.as_str(), None, true, None)
            .await
            .map_err(|e| WsError::Transport(format!("connect {url}: {e}")))?;

        debug!(%url, "WebSocket handshake complete");
        Ok(Box::new(TungsteniteSession { stream }))
    }
}

struct TungsteniteSession {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl TransportSession for TungsteniteSession {
    async fn next_frame(&mut self) -> Option<WsResult<Frame>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => return Some(Err(e.into())),
            };

            let frame = match message {
                Message::Text(text) => Frame::Text(text),
                Message::Binary(data) => match String::from_utf8(data) {
                    Ok(text) => Frame::Text(text),
                    Err(e) => {
                        return Some(Err(WsError::Protocol(format!(
                            "binary frame is not UTF-8: {e}"
                        ))))
                    }
                },
                Message::Ping(data) => Frame::Ping(data),
                Message::Pong(_) => Frame::Pong,
                Message::Close(frame) => {
                    let (code, reason) = frame
                        .map(|f| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((1005, String::new()));
                    Frame::Close { code, reason }
                }
                Message::Frame(_) => continue,
            };
            return Some(Ok(frame));
        }
    }

    async fn pong(&mut self, payload: Vec<u8>) -> WsResult<()> {
        self.stream.send(Message::Pong(payload)).await?;
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> WsResult<()> {
        let frame = CloseFrame {
            code: CloseCode::from(reason.code),
            reason: Cow::Borrowed(reason.reason),
        };
        match self.stream.close(Some(frame)).await {
            Ok(()) => Ok(()),
            Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed) => Ok(()),
            Err(e) => {
                warn!(?e, "Failed to send Close frame");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_joins_stream_name() {
        let transport = TungsteniteTransport::new("wss://stream.binance.com:9443/ws/");
        assert_eq!(
            transport.url_for("btcusdt@kline_1m"),
            "wss://stream.binance.com:9443/ws/btcusdt@kline_1m"
        );
    }

    #[test]
    fn test_close_reasons() {
        assert_eq!(CloseReason::MANUAL.code, 1000);
        assert_eq!(CloseReason::HEARTBEAT_TIMEOUT.code, 4000);
        assert_eq!(CloseReason::HEARTBEAT_TIMEOUT.reason, "heartbeat timeout");
    }
}

//! Mock exchange for integration tests.
//!
//! Serves both upstream surfaces the application talks to:
//! - A WebSocket stream endpoint that pushes a fixed script of frames to
//!   every client and records requested paths and client close frames
//! - A REST endpoint for `/api/v3/klines` and `/api/v3/ping`

use axum::extract::Query;
use axum::routing::get;
use axum::{Json, Router};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

/// Open time (ms) of the first snapshot candle.
pub const SNAPSHOT_START_MS: i64 = 1_700_000_040_000;

#[derive(Default)]
struct Recorded {
    paths: Vec<String>,
    client_closes: Vec<(u16, String)>,
}

pub struct MockExchange {
    ws_addr: SocketAddr,
    rest_addr: SocketAddr,
    recorded: Arc<Mutex<Recorded>>,
    shutdown: CancellationToken,
}

impl MockExchange {
    /// Start both servers; every stream client receives `frames`.
    pub async fn start(frames: Vec<String>) -> Self {
        let shutdown = CancellationToken::new();
        let recorded = Arc::new(Mutex::new(Recorded::default()));

        let ws_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_addr = ws_listener.local_addr().unwrap();
        let ws_recorded = recorded.clone();
        let ws_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = ws_listener.accept() => {
                        tokio::spawn(handle_stream(stream, frames.clone(), ws_recorded.clone()));
                    }
                    () = ws_shutdown.cancelled() => break,
                }
            }
        });

        let router = Router::new()
            .route("/api/v3/klines", get(klines))
            .route("/api/v3/ping", get(|| async { Json(json!({})) }));
        let rest_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let rest_addr = rest_listener.local_addr().unwrap();
        let rest_shutdown = shutdown.clone();
        tokio::spawn(async move {
            axum::serve(rest_listener, router)
                .with_graceful_shutdown(async move { rest_shutdown.cancelled().await })
                .await
                .unwrap();
        });

        Self {
            ws_addr,
            rest_addr,
            recorded,
            shutdown,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.ws_addr)
    }

    pub fn rest_url(&self) -> String {
        format!("http://{}", self.rest_addr)
    }

    pub async fn paths(&self) -> Vec<String> {
        self.recorded.lock().await.paths.clone()
    }

    pub async fn client_closes(&self) -> Vec<(u16, String)> {
        self.recorded.lock().await.client_closes.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

#[derive(Debug, Deserialize)]
struct KlinesQuery {
    limit: u32,
}

/// Three consecutive one-minute candles.
async fn klines(Query(q): Query<KlinesQuery>) -> Json<Value> {
    let rows: Vec<Value> = (0..q.limit.min(3) as i64)
        .map(|i| {
            let open_time = SNAPSHOT_START_MS + i * 60_000;
            json!([open_time, "100", "110", "90", "105", "5",
                open_time + 59_999, "500", 10, "2", "200", "0"])
        })
        .collect();
    Json(Value::Array(rows))
}

async fn handle_stream(stream: TcpStream, frames: Vec<String>, recorded: Arc<Mutex<Recorded>>) {
    let (path_tx, path_rx) = std::sync::mpsc::channel();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let _ = path_tx.send(req.uri().path().to_string());
        Ok(resp)
    };

    let ws_stream = match accept_hdr_async(stream, callback).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    if let Ok(path) = path_rx.try_recv() {
        recorded.lock().await.paths.push(path);
    }

    let (mut write, mut read) = ws_stream.split();
    for frame in frames {
        if write.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Ping(data)) => {
                let _ = write.send(Message::Pong(data)).await;
            }
            Ok(Message::Close(frame)) => {
                let (code, reason) = frame
                    .map(|f| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((1005, String::new()));
                recorded.lock().await.client_closes.push((code, reason));
                break;
            }
            Err(_) => break,
            _ => {}
        }
    }
}

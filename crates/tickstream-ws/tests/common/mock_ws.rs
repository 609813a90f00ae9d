//! Mock exchange stream server for integration tests.
//!
//! Provides a simple WebSocket server that can:
//! - Accept connections and record the requested stream path
//! - Push a scripted sequence of frames to every client
//! - Optionally close each session after the script
//! - Record close frames sent by the client

use futures_util::{SinkExt, StreamExt};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

#[derive(Clone)]
struct Script {
    frames: Vec<String>,
    close_after: bool,
}

#[derive(Default)]
struct Recorded {
    paths: Vec<String>,
    client_closes: Vec<(u16, String)>,
}

/// A mock stream server for testing.
pub struct MockWsServer {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    recorded: Arc<Mutex<Recorded>>,
}

impl MockWsServer {
    /// Start a server that sends `frames` to each client and keeps the
    /// session open.
    pub async fn start(frames: Vec<String>) -> Self {
        Self::start_with(frames, false).await
    }

    /// Start a server that sends `frames` and then closes with 1001.
    pub async fn start_closing(frames: Vec<String>) -> Self {
        Self::start_with(frames, true).await
    }

    async fn start_with(frames: Vec<String>, close_after: bool) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let recorded = Arc::new(Mutex::new(Recorded::default()));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let script = Script {
            frames,
            close_after,
        };

        let recorded_clone = recorded.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        tokio::spawn(handle_connection(stream, script.clone(), recorded_clone.clone()));
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            recorded,
        }
    }

    /// Base URL for the stream registry.
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Number of completed handshakes.
    pub async fn connection_count(&self) -> usize {
        self.recorded.lock().await.paths.len()
    }

    /// Request paths of every handshake, in order.
    pub async fn paths(&self) -> Vec<String> {
        self.recorded.lock().await.paths.clone()
    }

    /// Close frames received from clients.
    pub async fn client_closes(&self) -> Vec<(u16, String)> {
        self.recorded.lock().await.client_closes.clone()
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(stream: TcpStream, script: Script, recorded: Arc<Mutex<Recorded>>) {
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

    for frame in script.frames {
        if write.send(Message::Text(frame)).await.is_err() {
            return;
        }
    }

    if script.close_after {
        let close = CloseFrame {
            code: CloseCode::Away,
            reason: Cow::Borrowed("server restart"),
        };
        let _ = write.send(Message::Close(Some(close))).await;
        return;
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

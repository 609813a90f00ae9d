//! In-memory transport for connection and registry tests.

use crate::error::{WsError, WsResult};
use crate::subscription::StreamEvent;
use crate::transport::{CloseReason, Frame, Transport, TransportSession};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Transport whose sessions are driven by the test.
///
/// Sessions stay silent until frames are pushed through their handle.
#[derive(Default)]
pub(crate) struct FakeTransport {
    failing: AtomicBool,
    open_delay_ms: AtomicU64,
    opens: AtomicUsize,
    sessions: Mutex<Vec<FakeSessionHandle>>,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every open handshake, successful or not.
    pub(crate) fn set_open_delay(&self, delay: Duration) {
        self.open_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Handle of the `index`-th successfully opened session.
    pub(crate) fn session(&self, index: usize) -> FakeSessionHandle {
        self.sessions.lock()[index].clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, _stream_name: &str) -> WsResult<Box<dyn TransportSession>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.open_delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(WsError::Transport("connection refused".to_string()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = FakeSessionHandle {
            frames: tx,
            closed: Arc::new(Mutex::new(None)),
            pongs: Arc::new(AtomicUsize::new(0)),
        };
        let session = FakeSession {
            frames: rx,
            closed: Arc::clone(&handle.closed),
            pongs: Arc::clone(&handle.pongs),
        };
        self.sessions.lock().push(handle);
        Ok(Box::new(session))
    }
}

#[derive(Clone)]
pub(crate) struct FakeSessionHandle {
    frames: mpsc::UnboundedSender<Frame>,
    closed: Arc<Mutex<Option<CloseReason>>>,
    pongs: Arc<AtomicUsize>,
}

impl FakeSessionHandle {
    pub(crate) fn push(&self, frame: Frame) {
        let _ = self.frames.send(frame);
    }

    pub(crate) fn closed_with(&self) -> Option<CloseReason> {
        *self.closed.lock()
    }

    pub(crate) fn pongs(&self) -> usize {
        self.pongs.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    frames: mpsc::UnboundedReceiver<Frame>,
    closed: Arc<Mutex<Option<CloseReason>>>,
    pongs: Arc<AtomicUsize>,
}

#[async_trait]
impl TransportSession for FakeSession {
    async fn next_frame(&mut self) -> Option<WsResult<Frame>> {
        if self.closed.lock().is_some() {
            return None;
        }
        self.frames.recv().await.map(Ok)
    }

    async fn pong(&mut self, _payload: Vec<u8>) -> WsResult<()> {
        self.pongs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&mut self, reason: CloseReason) -> WsResult<()> {
        *self.closed.lock() = Some(reason);
        Ok(())
    }
}

/// Kline frame for BTCUSDT 1m with the given open time.
pub(crate) fn kline_frame(open_time_ms: i64, close: &str) -> String {
    format!(
        r#"{{"e":"kline","E":{event},"s":"BTCUSDT","k":{{"t":{open_time_ms},"T":{close_time},
        "s":"BTCUSDT","i":"1m","o":"100","h":"105","l":"95","c":"{close}","v":"10","x":false}}}}"#,
        event = open_time_ms + 20_500,
        close_time = open_time_ms + 59_999,
    )
}

pub(crate) async fn next_event(rx: &mut mpsc::Receiver<StreamEvent>) -> StreamEvent {
    tokio::time::timeout(Duration::from_secs(3600), rx.recv())
        .await
        .expect("timed out waiting for stream event")
        .expect("event channel closed")
}

/// Skip events until one matches.
pub(crate) async fn wait_for(
    rx: &mut mpsc::Receiver<StreamEvent>,
    pred: impl Fn(&StreamEvent) -> bool,
) -> StreamEvent {
    loop {
        let event = next_event(rx).await;
        if pred(&event) {
            return event;
        }
    }
}

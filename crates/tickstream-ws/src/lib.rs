//! Streaming connection subsystem for exchange market-data streams.
//!
//! Provides robust per-stream WebSocket connectivity with:
//! - One connection task per stream, driven by an explicit state machine
//! - Automatic reconnection with exponential backoff and bounded retries
//! - Heartbeat monitoring (transport-level staleness detection)
//! - A registry that owns every live connection and serializes changes
//! - Channel-based, strictly ordered event delivery per stream

pub mod codec;
pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod registry;
pub mod subscription;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;

pub use codec::decode;
pub use connection::{ConnectionState, ConnectionStatus};
pub use error::{WsError, WsResult};
pub use heartbeat::HeartbeatMonitor;
pub use registry::{RegistryConfig, StreamRegistry};
pub use subscription::{RetryConfig, StreamEvent, StreamSubscription, SubscriptionHandle};
pub use transport::{CloseReason, Frame, Transport, TransportSession, TungsteniteTransport};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any WebSocket connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

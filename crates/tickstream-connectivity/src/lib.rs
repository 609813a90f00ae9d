//! Connectivity prober.
//!
//! Periodically times a lightweight request against the exchange and
//! classifies the round trip into a [`ConnectionQuality`]. The resulting
//! [`ConnectivityStatus`] is published through a `watch` channel and is
//! independent of every stream subscription.

pub mod error;
pub mod prober;
pub mod status;

pub use error::{ConnectivityError, ConnectivityResult};
pub use prober::{ConnectivityProber, LatencyProbe, ProberConfig};
pub use status::{ConnectionQuality, ConnectivityStatus};

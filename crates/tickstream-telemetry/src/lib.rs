//! Prometheus metrics and structured logging for tickstream.
//!
//! Provides:
//! - Prometheus metrics for stream state, reconnects, probes and series
//! - Structured JSON logging with tracing

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{init_logging, init_logging_with_default};
pub use metrics::Metrics;

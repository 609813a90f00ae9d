//! tickstream service.
//!
//! Wires the components of the workspace into one process:
//! - One stream registry shared by every consumer
//! - One connectivity prober
//! - Realtime candle series for each configured chart
//! - Raw stream subscriptions drained into structured logs
//! - A read-only HTTP surface for health, state and metrics

pub mod app;
pub mod config;
pub mod error;
pub mod http;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};

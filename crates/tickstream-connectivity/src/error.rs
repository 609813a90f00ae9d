//! Connectivity error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectivityError {
    #[error("Offline: {0}")]
    Offline(String),

    #[error("Probe timed out after {0:?}")]
    ProbeTimeout(Duration),

    #[error("Probe failed: {0}")]
    Probe(#[from] tickstream_rest::RestError),
}

pub type ConnectivityResult<T> = Result<T, ConnectivityError>;

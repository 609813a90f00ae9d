//! Feed error types.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Snapshot fetch failed: {0}")]
    SnapshotFetch(String),

    #[error("Snapshot fetch timed out after {0:?}")]
    SnapshotTimeout(Duration),

    #[error("Subscribe failed: {0}")]
    Subscribe(#[from] tickstream_ws::WsError),

    #[error("Aggregator is stopped")]
    Stopped,
}

pub type FeedResult<T> = Result<T, FeedError>;

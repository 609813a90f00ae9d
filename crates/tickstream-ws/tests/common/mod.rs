//! Shared helpers for stream integration tests.

pub mod mock_ws;

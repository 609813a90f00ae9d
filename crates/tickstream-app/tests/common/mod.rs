//! Shared fixtures for application integration tests.

pub mod mock_exchange;

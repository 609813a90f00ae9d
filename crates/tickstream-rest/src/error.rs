//! REST client error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RestError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Response parse error: {0}")]
    Parse(String),
}

impl From<reqwest::Error> for RestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::HttpClient(e.to_string())
        }
    }
}

pub type RestResult<T> = Result<T, RestError>;

//! Error taxonomy for the organizer.
//!
//! Most variants never reach the caller of a pass: provider, host and timeout
//! failures are logged and degrade to "tab left ungrouped". Only structurally
//! invalid calls surface as `InvalidInput`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("provider failure: {0}")]
    Provider(String),

    #[error("malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("host operation failed: {0}")]
    Host(String),

    #[error("timed out after {0}ms")]
    Timeout(u64),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

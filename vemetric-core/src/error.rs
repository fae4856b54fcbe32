//! Error types for vemetric-core

use thiserror::Error;

/// Main error type for the vemetric-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid options, mask patterns or config file
    #[error("configuration error: {0}")]
    Config(String),

    /// A tracking operation was called before `init`
    #[error("vemetric is not initialized, call init() first")]
    NotInitialized,

    /// Non-2xx response or network failure on the request path.
    ///
    /// Network failures carry status `0`.
    #[error("request failed ({status}): {status_text}")]
    Transport { status: u16, status_text: String },

    /// Session storage could not be written
    #[error("session storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl Error {
    /// Build a transport error from a status line.
    pub fn transport(status: u16, status_text: impl Into<String>) -> Self {
        Error::Transport {
            status,
            status_text: status_text.into(),
        }
    }
}

/// Result type alias for vemetric-core
pub type Result<T> = std::result::Result<T, Error>;

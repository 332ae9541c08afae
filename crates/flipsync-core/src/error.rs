//! Error types for the flipsync system
//!
//! This module defines all error types used throughout the crate.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for flipsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the flipsync system
#[derive(Error, Debug)]
pub enum Error {
    /// The service answered, but the page lacked the expected fields
    #[error("Malformed puzzle page: {0}")]
    FetchMalformed(String),

    /// The store file exists but cannot be parsed
    #[error("Store file {} is corrupt: {message}", path.display())]
    StoreCorrupt {
        /// Path of the offending file
        path: PathBuf,
        /// Parser message
        message: String,
    },

    /// Store I/O errors (read, write, rename)
    #[error("Store error: {0}")]
    Store(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// External solver crashed, timed out, or printed nothing usable
    #[error("Solver failure: {0}")]
    Solver(String),

    /// DNS, connection, TLS or HTTP status failures talking to the service
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a malformed-page error
    pub fn fetch_malformed(msg: impl Into<String>) -> Self {
        Self::FetchMalformed(msg.into())
    }

    /// Create a store-corruption error
    pub fn store_corrupt(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::StoreCorrupt {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a solver error
    pub fn solver(msg: impl Into<String>) -> Self {
        Self::Solver(msg.into())
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Whether this error should terminate the sync loop.
    ///
    /// Failures scoped to a single iteration (malformed pages, solver trouble,
    /// a missing record) are not fatal. Anything that leaves the store or the
    /// connection to the service in doubt is.
    pub fn is_fatal(&self) -> bool {
        match self {
            Error::FetchMalformed(_)
            | Error::Solver(_)
            | Error::NotFound(_)
            | Error::InvalidInput(_) => false,
            Error::StoreCorrupt { .. }
            | Error::Store(_)
            | Error::Transport(_)
            | Error::Config(_)
            | Error::Io(_)
            | Error::Json(_)
            | Error::Other(_) => true,
        }
    }

    /// Whether a retry of the same call could plausibly succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::FetchMalformed(_) | Error::Solver(_) | Error::Transport(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

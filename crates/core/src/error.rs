//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("hash mismatch for {url}: expected {expected}, got {actual}")]
    HashMismatch {
        url: String,
        expected: String,
        actual: String,
    },

    #[error("invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("invalid pattern {pattern:?} in group {group}: {source}")]
    InvalidPattern {
        group: String,
        pattern: String,
        #[source]
        source: Box<regex::Error>,
    },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

//! Error types for the semimatch library.
//!
//! Uses thiserror for the library-side taxonomy; the CLI binary wraps these
//! in anyhow for user-facing context.

use thiserror::Error;

/// Main error type for semimatch operations
#[derive(Error, Debug)]
pub enum SemiMatchError {
    /// Configuration file could not be parsed or failed validation
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dataset loading, splitting, or batching failed
    #[error("Dataset error: {0}")]
    Dataset(String),

    /// Dataset archive download or extraction failed
    #[error("Download error: {0}")]
    Download(String),

    /// Training loop failure
    #[error("Training error: {0}")]
    Training(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience Result type for semimatch operations
pub type Result<T> = std::result::Result<T, SemiMatchError>;

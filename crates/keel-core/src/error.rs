//! Error types for keel.

use thiserror::Error;

/// Result type alias using keel's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for keel operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Dispatch hint transport failed
    #[error("Hint channel error: {0}")]
    Hint(String),

    /// Store could not be reached within the startup retry budget
    #[error("Unavailable: {0}")]
    Unavailable(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

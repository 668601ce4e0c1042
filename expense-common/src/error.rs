//! Common error types for the expense pipeline

use thiserror::Error;

/// Common result type for expense operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by stores, config and the pipeline
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Resource with the same identity already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Remote store unreachable or answering with an error
    #[error("Remote store error: {0}")]
    Remote(String),

    /// Operation not offered by this backend
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for the `NotFound` variant
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

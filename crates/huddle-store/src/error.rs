//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// A collection could not be encoded.
    #[error("encoding error in {collection}: {reason}")]
    Encoding {
        collection: &'static str,
        reason: String,
    },

    /// A stored collection could not be decoded.
    #[error("decoding error in {collection}: {reason}")]
    Decoding {
        collection: &'static str,
        reason: String,
    },

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// The backend refused the operation.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A blocking task failed to complete.
    #[error("background task failed: {0}")]
    Task(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

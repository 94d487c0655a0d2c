//! Error types for huddle core.

use thiserror::Error;

/// Errors raised by the pure core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A remote user id is not a parseable UUID.
    #[error("invalid user id {0:?}: not a UUID")]
    InvalidUserId(String),

    /// Discovery attributes or an invitation context lacked a required key.
    #[error("missing attribute: {0}")]
    MissingAttribute(&'static str),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

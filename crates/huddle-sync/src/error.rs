//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The platform transport refused an operation.
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),

    /// A wire payload could not be decoded.
    #[error("decode failure: {0}")]
    Decode(String),

    /// A wire payload could not be encoded.
    #[error("encode failure: {0}")]
    Encode(String),

    /// Peer is not connected.
    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    /// A conflict decision was requested for a peer with nothing pending.
    #[error("no pending conflict with {0}")]
    NoPendingConflict(String),

    /// Identity data in a payload was invalid.
    #[error("core error: {0}")]
    Core(#[from] huddle_core::CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

//! Error types for the node.

use huddle_core::{CoreError, PeerHandle};
use huddle_store::StoreError;
use huddle_sync::SyncError;
use thiserror::Error;

/// Errors returned to callers of a [`NodeHandle`](crate::NodeHandle).
#[derive(Debug, Error)]
pub enum NodeError {
    /// Identity or attribute error.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync or transport error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// The node has shut down.
    #[error("node is shut down")]
    Closed,

    /// No record for that handle.
    #[error("unknown peer: {0}")]
    UnknownPeer(PeerHandle),

    /// No inbound invitation is waiting for that handle.
    #[error("no pending invitation from {0}")]
    NoPendingInvitation(PeerHandle),

    /// The peer is not in a state that allows the operation.
    #[error("peer {handle} is {state}, cannot {action}")]
    InvalidState {
        handle: PeerHandle,
        state: huddle_core::PeerState,
        action: &'static str,
    },
}

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, NodeError>;

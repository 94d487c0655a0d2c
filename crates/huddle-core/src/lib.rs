//! # Huddle Core
//!
//! Pure primitives for huddle: identities, peer records, message logs,
//! leader election and log merging.
//!
//! This crate contains no I/O, no storage, no networking. Everything here is
//! deterministic computation over owned data, so the coordination actor in
//! `huddle` can call into it without locking.
//!
//! ## Key Types
//!
//! - [`UserId`] - Durable identity of a device owner (a UUID string)
//! - [`PeerHandle`] - Transient transport identity of a remote device
//! - [`RemotePeerRecord`] / [`PeerState`] - What we know about an observed peer
//! - [`KnownPeer`] - A remote user we have connected to before
//! - [`ChatMessage`] / [`MessageLog`] - The append-only conversation log
//! - [`MemoryRecord`] - Facts synchronized by naive union
//!
//! ## Algorithms
//!
//! - [`should_initiate`] - Stateless pairwise leader election
//! - [`diff_logs`] / [`merge_remote_only`] - Divergence detection and merge

pub mod election;
pub mod error;
pub mod merge;
pub mod message;
pub mod peer;
pub mod types;

pub use election::should_initiate;
pub use error::{CoreError, Result};
pub use merge::{diff_logs, merge_memories, merge_remote_only, LogDiff};
pub use message::{ChatMessage, MemoryRecord, MessageLog, SYSTEM_SENDER};
pub use peer::{
    DiscoveryAttributes, InvitationContext, KnownPeer, LocalIdentity, PeerState,
    RemotePeerRecord, ATTR_USER_ID, ATTR_USER_NAME,
};
pub use types::{now_millis, PeerHandle, UserId};

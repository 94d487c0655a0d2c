//! # Huddle Sync
//!
//! Wire protocol, transport capability and log synchronization.
//!
//! ## Overview
//!
//! When a session with a peer reaches `connected`, each side sends its whole
//! message log and memory set. Message logs are compared by id:
//!
//! - one side is a superset (or they are equal): merge automatically
//! - each side has messages the other lacks: park the received log and ask
//!   the user to pick one history
//!
//! Memory records are always merged by union.
//!
//! ## Message Flow
//!
//! ```text
//! Device A                              Device B
//!   |-------- sync (A's log) ---------->|
//!   |<------- sync (B's log) -----------|
//!   |-------- sync_memories ----------->|
//!   |<------- sync_memories ------------|
//!          (both detect a conflict)
//!   |-------- sync_decision ----------->|   A's user picked a history
//! ```
//!
//! A `sync_decision` with `useRemote = true` means the sender adopted the
//! receiver's history; `useRemote = false` means the sender kept its own and
//! the receiver must adopt it. Exactly one side replaces its log.

pub mod convergence;
pub mod error;
pub mod memories;
pub mod messages;
pub mod protocol;
pub mod transport;

pub use convergence::{log_digest, LogDigest};
pub use error::{Result, SyncError};
pub use memories::MemorySet;
pub use messages::{decode_invitation, encode_invitation, SyncMessage, WireMessage};
pub use protocol::{DecisionOutcome, MessageSync, SyncConfig, SyncOutcome};
pub use transport::{
    memory::MemoryNetwork, memory::MemoryTransport, InvitationResponder, SessionState,
    Transport, TransportEvent,
};

//! # Huddle
//!
//! Nearby device sync: devices that belong to the same person find each
//! other, connect, and keep a shared conversation log and memory set in
//! step, without any server.
//!
//! ## Overview
//!
//! - **Discovery**: every device advertises its user id and browses for others
//! - **Election**: for a known pair, exactly one side sends the invitation
//! - **Sync**: on connect both sides exchange their full logs; supersets merge
//!   automatically, divergent logs wait for the user to pick one history
//! - **Forget**: dropping a device is mutual and optionally blocks it
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use huddle::{get_or_create_local_identity, Node, NodeConfig};
//! use huddle::store::SqliteStore;
//! use huddle::sync::MemoryNetwork;
//!
//! async fn example() -> huddle::Result<()> {
//!     let config = NodeConfig::named("Phone");
//!     let store = Arc::new(SqliteStore::open("huddle.db")?);
//!     let identity = get_or_create_local_identity(store.as_ref(), &config.display_name).await?;
//!
//!     let network = MemoryNetwork::new();
//!     let (transport, transport_events) = network.create_transport(identity.device.clone()).await;
//!
//!     let (node, mut events) =
//!         Node::start(config, identity, store, Arc::new(transport), transport_events).await?;
//!     node.start().await?;
//!     node.send_message("hello from my phone").await?;
//!
//!     while let Some(event) = events.recv().await {
//!         println!("{:?}", event);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `huddle::core` - identities, peer records, messages, election, merge
//! - `huddle::store` - persistence abstraction and SQLite
//! - `huddle::sync` - wire protocol, transport capability, sync protocol

pub mod config;
pub mod error;
pub mod handle;
pub mod identity;
pub mod node;
pub mod peers;
pub mod registry;

pub use huddle_core as core;
pub use huddle_store as store;
pub use huddle_sync as sync;

pub use config::{NodeConfig, DEFAULT_SERVICE_ID};
pub use error::{NodeError, Result};
pub use handle::{Command, NodeEvent, NodeHandle};
pub use identity::get_or_create_local_identity;
pub use node::Node;
pub use peers::{PeerTable, Transition};
pub use registry::Registry;

pub use huddle_core::{
    ChatMessage, KnownPeer, LocalIdentity, MemoryRecord, PeerHandle, PeerState, RemotePeerRecord,
    UserId,
};
pub use huddle_sync::{DecisionOutcome, LogDigest};

//! # Huddle Store
//!
//! The persistence capability for huddle. Every durable piece of state is a
//! named collection that can be loaded and saved independently.
//!
//! ## Key Types
//!
//! - [`Store`] - Async trait over raw per-collection blobs
//! - [`StoreExt`] - Typed load/save for each collection (CBOR encoded)
//! - [`SqliteStore`] - SQLite-backed persistent store
//! - [`MemoryStore`] - In-memory store for tests
//! - [`Collection`] - The names of the persisted collections
//!
//! ## Usage
//!
//! ```rust,no_run
//! use huddle_store::{SqliteStore, StoreExt};
//!
//! async fn example() {
//!     let store = SqliteStore::open("huddle.db").unwrap();
//!     let messages = store.load_messages().await.unwrap();
//!     store.save_messages(&messages).await.unwrap();
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Whole-collection writes**: collections are small (a handful of peers,
//!   one conversation) so each save rewrites the collection.
//! - **Missing means empty**: loading a collection that was never saved yields
//!   its empty value, not an error.

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{Collection, Store, StoreExt};

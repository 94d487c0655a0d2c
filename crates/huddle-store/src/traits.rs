//! Store trait: the abstract interface for huddle persistence.
//!
//! Backends only move opaque bytes per collection. Encoding lives in
//! [`StoreExt`] so every backend shares one on-disk format.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use huddle_core::{ChatMessage, KnownPeer, LocalIdentity, MemoryRecord, UserId};

use crate::error::{Result, StoreError};

/// A named, independently persisted collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Identity,
    Messages,
    Memories,
    KnownPeers,
    BlockedUsers,
    SyncEnabledUsers,
}

impl Collection {
    /// Every collection, in a stable order.
    pub const ALL: [Collection; 6] = [
        Collection::Identity,
        Collection::Messages,
        Collection::Memories,
        Collection::KnownPeers,
        Collection::BlockedUsers,
        Collection::SyncEnabledUsers,
    ];

    /// Storage key.
    pub const fn key(&self) -> &'static str {
        match self {
            Collection::Identity => "identity",
            Collection::Messages => "messages",
            Collection::Memories => "memories",
            Collection::KnownPeers => "known_peers",
            Collection::BlockedUsers => "blocked_users",
            Collection::SyncEnabledUsers => "sync_enabled_users",
        }
    }
}

/// The Store trait: async load/save of raw collection bytes.
///
/// Implementations must be thread-safe. A save replaces the previous value
/// of that collection atomically.
#[async_trait]
pub trait Store: Send + Sync {
    /// Load the raw bytes of a collection, or None if it was never saved.
    async fn load_raw(&self, collection: Collection) -> Result<Option<Vec<u8>>>;

    /// Replace the raw bytes of a collection.
    async fn save_raw(&self, collection: Collection, bytes: &[u8]) -> Result<()>;

    /// Remove a collection.
    async fn clear(&self, collection: Collection) -> Result<()>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn load_raw(&self, collection: Collection) -> Result<Option<Vec<u8>>> {
        (**self).load_raw(collection).await
    }

    async fn save_raw(&self, collection: Collection, bytes: &[u8]) -> Result<()> {
        (**self).save_raw(collection, bytes).await
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        (**self).clear(collection).await
    }
}

/// Typed access to every collection.
#[async_trait]
pub trait StoreExt: Store {
    async fn load_identity(&self) -> Result<Option<LocalIdentity>> {
        load(self, Collection::Identity).await
    }

    async fn save_identity(&self, identity: &LocalIdentity) -> Result<()> {
        save(self, Collection::Identity, identity).await
    }

    async fn load_messages(&self) -> Result<Vec<ChatMessage>> {
        Ok(load(self, Collection::Messages).await?.unwrap_or_default())
    }

    async fn save_messages(&self, messages: &[ChatMessage]) -> Result<()> {
        save(self, Collection::Messages, &messages).await
    }

    async fn load_memories(&self) -> Result<Vec<MemoryRecord>> {
        Ok(load(self, Collection::Memories).await?.unwrap_or_default())
    }

    async fn save_memories(&self, memories: &[MemoryRecord]) -> Result<()> {
        save(self, Collection::Memories, &memories).await
    }

    async fn load_known_peers(&self) -> Result<Vec<KnownPeer>> {
        Ok(load(self, Collection::KnownPeers).await?.unwrap_or_default())
    }

    async fn save_known_peers(&self, peers: &[KnownPeer]) -> Result<()> {
        save(self, Collection::KnownPeers, &peers).await
    }

    async fn load_blocked(&self) -> Result<BTreeSet<UserId>> {
        Ok(load(self, Collection::BlockedUsers).await?.unwrap_or_default())
    }

    async fn save_blocked(&self, blocked: &BTreeSet<UserId>) -> Result<()> {
        save(self, Collection::BlockedUsers, blocked).await
    }

    async fn load_sync_enabled(&self) -> Result<BTreeSet<UserId>> {
        Ok(load(self, Collection::SyncEnabledUsers).await?.unwrap_or_default())
    }

    async fn save_sync_enabled(&self, users: &BTreeSet<UserId>) -> Result<()> {
        save(self, Collection::SyncEnabledUsers, users).await
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

async fn load<S, T>(store: &S, collection: Collection) -> Result<Option<T>>
where
    S: Store + ?Sized,
    T: DeserializeOwned,
{
    match store.load_raw(collection).await? {
        Some(bytes) => ciborium::from_reader(bytes.as_slice())
            .map(Some)
            .map_err(|e| StoreError::Decoding {
                collection: collection.key(),
                reason: e.to_string(),
            }),
        None => Ok(None),
    }
}

async fn save<S, T>(store: &S, collection: Collection, value: &T) -> Result<()>
where
    S: Store + ?Sized,
    T: Serialize + ?Sized,
{
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| StoreError::Encoding {
        collection: collection.key(),
        reason: e.to_string(),
    })?;
    store.save_raw(collection, &buf).await
}

//! In-memory implementation of the Store trait.
//!
//! This is primarily for testing. It has the same semantics as SQLite
//! but keeps everything in memory with no persistence. Writes can be made to
//! fail on demand to exercise persistence-failure handling.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::{Collection, Store};

/// In-memory store implementation.
///
/// All data is lost when the store is dropped. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<Collection, Vec<u8>>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent save fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn poisoned() -> StoreError {
        StoreError::Unavailable("memory store lock poisoned".into())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load_raw(&self, collection: Collection) -> Result<Option<Vec<u8>>> {
        let inner = self.collections.read().map_err(|_| Self::poisoned())?;
        Ok(inner.get(&collection).cloned())
    }

    async fn save_raw(&self, collection: Collection, bytes: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!(
                "write to {} rejected",
                collection.key()
            )));
        }
        let mut inner = self.collections.write().map_err(|_| Self::poisoned())?;
        inner.insert(collection, bytes.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        let mut inner = self.collections.write().map_err(|_| Self::poisoned())?;
        inner.remove(&collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use huddle_core::{ChatMessage, KnownPeer, LocalIdentity, UserId};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_missing_collections_load_empty() {
        let store = MemoryStore::new();
        assert!(store.load_identity().await.unwrap().is_none());
        assert!(store.load_messages().await.unwrap().is_empty());
        assert!(store.load_blocked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_typed_roundtrip() {
        let store = MemoryStore::new();
        let identity = LocalIdentity::generate("Phone");
        store.save_identity(&identity).await.unwrap();
        assert_eq!(store.load_identity().await.unwrap(), Some(identity.clone()));

        let message = ChatMessage::local(&identity.user_id, "Phone", "hello");
        store.save_messages(&[message.clone()]).await.unwrap();
        assert_eq!(store.load_messages().await.unwrap(), vec![message]);

        let peer = KnownPeer {
            display_name: "Laptop".into(),
            user_id: UserId::generate(),
            last_seen_at: 42,
            sync_enabled: true,
        };
        store.save_known_peers(&[peer.clone()]).await.unwrap();
        assert_eq!(store.load_known_peers().await.unwrap(), vec![peer]);
    }

    #[tokio::test]
    async fn test_collections_are_independent() {
        let store = MemoryStore::new();
        let blocked: BTreeSet<UserId> = [UserId::generate()].into_iter().collect();
        store.save_blocked(&blocked).await.unwrap();
        assert!(store.load_sync_enabled().await.unwrap().is_empty());

        store.clear(Collection::BlockedUsers).await.unwrap();
        assert!(store.load_blocked().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_writes_keep_previous_value() {
        let store = MemoryStore::new();
        let first: BTreeSet<UserId> = [UserId::new("a")].into_iter().collect();
        store.save_blocked(&first).await.unwrap();

        store.set_fail_writes(true);
        let second: BTreeSet<UserId> = [UserId::new("b")].into_iter().collect();
        assert!(matches!(
            store.save_blocked(&second).await,
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.load_blocked().await.unwrap(), first);
        assert_eq!(store.write_count(), 1);
    }
}

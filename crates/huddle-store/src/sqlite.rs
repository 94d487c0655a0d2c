//! SQLite implementation of the Store trait.
//!
//! This is the persistent backend. It uses rusqlite with bundled SQLite,
//! wrapped in async via tokio::spawn_blocking.

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use huddle_core::now_millis;

use crate::error::{Result, StoreError};
use crate::migration;
use crate::traits::{Collection, Store};

/// SQLite-based store implementation.
///
/// Thread-safe via internal Mutex. All operations use spawn_blocking
/// to avoid blocking the async runtime.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// Open a SQLite database at the given path.
    ///
    /// Creates the file and runs migrations if it doesn't exist.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut conn = Connection::open(path)?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory SQLite database.
    ///
    /// Useful for testing.
    pub fn open_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        migration::migrate(&mut conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|e| {
                StoreError::Database(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_LOCKED),
                    Some(format!("mutex poisoned: {}", e)),
                ))
            })?;
            f(&conn)
        })
        .await
        .map_err(|e| StoreError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn load_raw(&self, collection: Collection) -> Result<Option<Vec<u8>>> {
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT payload FROM collections WHERE name = ?1",
                params![collection.key()],
                |row| row.get(0),
            )
            .optional()
            .map_err(StoreError::from)
        })
        .await
    }

    async fn save_raw(&self, collection: Collection, bytes: &[u8]) -> Result<()> {
        let bytes = bytes.to_vec();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO collections (name, payload, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(name) DO UPDATE SET payload = excluded.payload,
                                                 updated_at = excluded.updated_at",
                params![collection.key(), bytes, now_millis()],
            )?;
            tracing::debug!(collection = collection.key(), len = bytes.len(), "saved collection");
            Ok(())
        })
        .await
    }

    async fn clear(&self, collection: Collection) -> Result<()> {
        self.with_conn(move |conn| {
            conn.execute(
                "DELETE FROM collections WHERE name = ?1",
                params![collection.key()],
            )?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::StoreExt;
    use huddle_core::{ChatMessage, LocalIdentity, MemoryRecord, UserId};
    use std::collections::BTreeSet;

    #[tokio::test]
    async fn test_save_and_load_raw() {
        let store = SqliteStore::open_memory().unwrap();
        assert_eq!(store.load_raw(Collection::Messages).await.unwrap(), None);

        store.save_raw(Collection::Messages, b"abc").await.unwrap();
        store.save_raw(Collection::Messages, b"def").await.unwrap();
        assert_eq!(
            store.load_raw(Collection::Messages).await.unwrap(),
            Some(b"def".to_vec())
        );

        store.clear(Collection::Messages).await.unwrap();
        assert_eq!(store.load_raw(Collection::Messages).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_typed_collections() {
        let store = SqliteStore::open_memory().unwrap();
        let identity = LocalIdentity::generate("Desk");
        let message = ChatMessage::local(&identity.user_id, "Desk", "note to self");
        let memory = MemoryRecord::new("prefers mornings").with_category("habits");

        store.save_identity(&identity).await.unwrap();
        store.save_messages(&[message.clone()]).await.unwrap();
        store.save_memories(&[memory.clone()]).await.unwrap();

        assert_eq!(store.load_identity().await.unwrap(), Some(identity));
        assert_eq!(store.load_messages().await.unwrap(), vec![message]);
        assert_eq!(store.load_memories().await.unwrap(), vec![memory]);
    }

    #[tokio::test]
    async fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("huddle.db");
        let users: BTreeSet<UserId> = [UserId::generate(), UserId::generate()].into_iter().collect();

        {
            let store = SqliteStore::open(&path).unwrap();
            store.save_sync_enabled(&users).await.unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.load_sync_enabled().await.unwrap(), users);
    }

    #[tokio::test]
    async fn test_corrupt_payload_is_decoding_error() {
        let store = SqliteStore::open_memory().unwrap();
        store.save_raw(Collection::KnownPeers, &[0xff, 0x00]).await.unwrap();
        assert!(matches!(
            store.load_known_peers().await,
            Err(StoreError::Decoding { collection: "known_peers", .. })
        ));
    }
}

//! Known-peer registry and block list.
//!
//! One table keyed by user id holds every known peer together with its
//! sync-enabled flag. The sync-enabled set is still persisted as its own
//! collection, derived from the table on every save.
//!
//! Devices that see each other are assumed to belong to the same user, so
//! the first sighting of a user id records it as a known, sync-enabled peer.
//! A user forgotten during this run is not re-recorded on sight.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use huddle_core::{now_millis, KnownPeer, UserId};
use huddle_store::{Store, StoreExt};

use crate::error::Result;

/// Known peers and blocked users, persisted on every mutation.
pub struct Registry {
    store: Arc<dyn Store>,
    peers: BTreeMap<UserId, KnownPeer>,
    blocked: BTreeSet<UserId>,
    /// Users forgotten since load. Not persisted.
    forgotten: BTreeSet<UserId>,
}

impl Registry {
    /// Load the registry from `store`.
    ///
    /// A user listed in the sync-enabled collection whose table entry says
    /// otherwise is treated as enabled.
    pub async fn load(store: Arc<dyn Store>) -> Result<Self> {
        let mut peers: BTreeMap<UserId, KnownPeer> = store
            .load_known_peers()
            .await?
            .into_iter()
            .map(|p| (p.user_id.clone(), p))
            .collect();
        for user in store.load_sync_enabled().await? {
            if let Some(peer) = peers.get_mut(&user) {
                peer.sync_enabled = true;
            }
        }
        let blocked = store.load_blocked().await?;
        tracing::debug!(known = peers.len(), blocked = blocked.len(), "loaded registry");
        Ok(Self {
            store,
            peers,
            blocked,
            forgotten: BTreeSet::new(),
        })
    }

    pub fn is_known(&self, user: &UserId) -> bool {
        self.peers.contains_key(user)
    }

    pub fn is_sync_enabled(&self, user: &UserId) -> bool {
        self.peers.get(user).is_some_and(|p| p.sync_enabled)
    }

    pub fn is_blocked(&self, user: &UserId) -> bool {
        self.blocked.contains(user)
    }

    /// Known, sync-enabled and not blocked.
    pub fn should_auto_connect(&self, user: &UserId) -> bool {
        self.is_sync_enabled(user) && !self.is_blocked(user)
    }

    pub fn get(&self, user: &UserId) -> Option<&KnownPeer> {
        self.peers.get(user)
    }

    pub fn known_peers(&self) -> Vec<KnownPeer> {
        self.peers.values().cloned().collect()
    }

    pub fn blocked(&self) -> &BTreeSet<UserId> {
        &self.blocked
    }

    /// Note a sighting of `user`.
    ///
    /// Known users are refreshed. Unknown users are recorded with sync
    /// enabled unless blocked or forgotten earlier in this run. Returns true
    /// when the user was newly recorded.
    pub async fn observe(&mut self, display_name: &str, user: &UserId) -> bool {
        if self.touch(display_name, user).await {
            return false;
        }
        if self.is_blocked(user) || self.forgotten.contains(user) {
            tracing::debug!(user = %user, "not recording sighting");
            return false;
        }
        self.upsert_known_peer(display_name, user).await;
        true
    }

    /// Record a peer we connected to. Always enables sync for it.
    pub async fn upsert_known_peer(&mut self, display_name: &str, user: &UserId) {
        self.forgotten.remove(user);
        let peer = self.peers.entry(user.clone()).or_insert_with(|| KnownPeer {
            display_name: display_name.to_string(),
            user_id: user.clone(),
            last_seen_at: 0,
            sync_enabled: true,
        });
        peer.display_name = display_name.to_string();
        peer.last_seen_at = now_millis();
        peer.sync_enabled = true;
        tracing::debug!(user = %user, name = display_name, "upserted known peer");
        self.persist_peers().await;
    }

    /// Refresh name and last sighting of a known peer. Returns false for
    /// unknown users.
    pub async fn touch(&mut self, display_name: &str, user: &UserId) -> bool {
        let Some(peer) = self.peers.get_mut(user) else {
            return false;
        };
        peer.display_name = display_name.to_string();
        peer.last_seen_at = now_millis();
        self.persist_peers().await;
        true
    }

    /// Toggle sync for a known peer. Message history is left alone.
    /// Returns false for unknown users.
    pub async fn set_sync_enabled(&mut self, user: &UserId, enabled: bool) -> bool {
        let Some(peer) = self.peers.get_mut(user) else {
            return false;
        };
        peer.sync_enabled = enabled;
        tracing::info!(user = %user, enabled, "sync toggled");
        self.persist_peers().await;
        true
    }

    pub async fn block(&mut self, user: &UserId) {
        if self.blocked.insert(user.clone()) {
            tracing::info!(user = %user, "blocked");
            self.persist_blocked().await;
        }
    }

    pub async fn unblock(&mut self, user: &UserId) {
        if self.blocked.remove(user) {
            tracing::info!(user = %user, "unblocked");
            self.persist_blocked().await;
        }
    }

    /// Drop a known peer and its sync flag. Returns whether it was known.
    pub async fn forget(&mut self, user: &UserId) -> bool {
        self.forgotten.insert(user.clone());
        let removed = self.peers.remove(user).is_some();
        if removed {
            self.persist_peers().await;
        }
        removed
    }

    async fn persist_peers(&self) {
        let peers: Vec<KnownPeer> = self.peers.values().cloned().collect();
        let enabled: BTreeSet<UserId> = self
            .peers
            .values()
            .filter(|p| p.sync_enabled)
            .map(|p| p.user_id.clone())
            .collect();

        if let Err(e) = self.store.save_known_peers(&peers).await {
            tracing::warn!(error = %e, "failed to persist known peers");
        }
        if let Err(e) = self.store.save_sync_enabled(&enabled).await {
            tracing::warn!(error = %e, "failed to persist sync-enabled users");
        }
    }

    async fn persist_blocked(&self) {
        if let Err(e) = self.store.save_blocked(&self.blocked).await {
            tracing::warn!(error = %e, "failed to persist blocked users");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use huddle_store::MemoryStore;

    async fn registry() -> (Arc<MemoryStore>, Registry) {
        let store = Arc::new(MemoryStore::new());
        let registry = Registry::load(store.clone()).await.unwrap();
        (store, registry)
    }

    #[tokio::test]
    async fn test_upsert_enables_sync_and_persists() {
        let (store, mut registry) = registry().await;
        let user = UserId::generate();

        registry.upsert_known_peer("Laptop", &user).await;

        assert!(registry.is_known(&user));
        assert!(registry.should_auto_connect(&user));
        assert_eq!(store.load_known_peers().await.unwrap().len(), 1);
        assert!(store.load_sync_enabled().await.unwrap().contains(&user));
    }

    #[tokio::test]
    async fn test_upsert_reenables_sync() {
        let (_, mut registry) = registry().await;
        let user = UserId::generate();
        registry.upsert_known_peer("Laptop", &user).await;
        registry.set_sync_enabled(&user, false).await;
        assert!(!registry.should_auto_connect(&user));

        registry.upsert_known_peer("Laptop", &user).await;
        assert!(registry.is_sync_enabled(&user));
    }

    #[tokio::test]
    async fn test_touch_only_updates_known() {
        let (_, mut registry) = registry().await;
        let user = UserId::generate();
        assert!(!registry.touch("Laptop", &user).await);
        assert!(!registry.is_known(&user));

        registry.upsert_known_peer("Laptop", &user).await;
        assert!(registry.touch("Old laptop", &user).await);
        assert_eq!(registry.get(&user).map(|p| p.display_name.as_str()), Some("Old laptop"));
    }

    #[tokio::test]
    async fn test_blocked_never_auto_connects() {
        let (store, mut registry) = registry().await;
        let user = UserId::generate();
        registry.upsert_known_peer("Laptop", &user).await;
        registry.block(&user).await;

        assert!(registry.is_blocked(&user));
        assert!(!registry.should_auto_connect(&user));
        assert!(store.load_blocked().await.unwrap().contains(&user));

        registry.unblock(&user).await;
        assert!(registry.should_auto_connect(&user));
    }

    #[tokio::test]
    async fn test_forget_removes_known_and_sync() {
        let (store, mut registry) = registry().await;
        let user = UserId::generate();
        registry.upsert_known_peer("Laptop", &user).await;

        assert!(registry.forget(&user).await);
        assert!(!registry.is_known(&user));
        assert!(!registry.is_sync_enabled(&user));
        assert!(store.load_sync_enabled().await.unwrap().is_empty());
        assert!(!registry.forget(&user).await);
    }

    #[tokio::test]
    async fn test_first_sighting_records_known_peer() {
        let (store, mut registry) = registry().await;
        let user = UserId::generate();

        assert!(registry.observe("Laptop", &user).await);
        assert!(registry.should_auto_connect(&user));
        assert!(store.load_sync_enabled().await.unwrap().contains(&user));

        // Later sightings only refresh.
        assert!(!registry.observe("Work laptop", &user).await);
        assert_eq!(registry.get(&user).map(|p| p.display_name.as_str()), Some("Work laptop"));
    }

    #[tokio::test]
    async fn test_sighting_keeps_disabled_sync() {
        let (_, mut registry) = registry().await;
        let user = UserId::generate();
        registry.upsert_known_peer("Laptop", &user).await;
        registry.set_sync_enabled(&user, false).await;

        registry.observe("Laptop", &user).await;
        assert!(!registry.is_sync_enabled(&user));
    }

    #[tokio::test]
    async fn test_blocked_and_forgotten_users_are_not_recorded_on_sight() {
        let (_, mut registry) = registry().await;
        let (blocked, forgotten) = (UserId::generate(), UserId::generate());
        registry.block(&blocked).await;
        registry.upsert_known_peer("Tablet", &forgotten).await;
        registry.forget(&forgotten).await;

        assert!(!registry.observe("Laptop", &blocked).await);
        assert!(!registry.observe("Tablet", &forgotten).await);
        assert!(registry.known_peers().is_empty());

        // Connecting again makes it known once more.
        registry.upsert_known_peer("Tablet", &forgotten).await;
        assert!(registry.should_auto_connect(&forgotten));
    }

    #[tokio::test]
    async fn test_load_reconciles_sync_set() {
        let store = Arc::new(MemoryStore::new());
        let user = UserId::generate();
        store
            .save_known_peers(&[KnownPeer {
                display_name: "Laptop".into(),
                user_id: user.clone(),
                last_seen_at: 1,
                sync_enabled: false,
            }])
            .await
            .unwrap();
        store
            .save_sync_enabled(&[user.clone()].into_iter().collect())
            .await
            .unwrap();

        let registry = Registry::load(store).await.unwrap();
        assert!(registry.is_sync_enabled(&user));
    }

    #[tokio::test]
    async fn test_persistence_failure_keeps_memory_state() {
        let (store, mut registry) = registry().await;
        store.set_fail_writes(true);
        let user = UserId::generate();

        registry.upsert_known_peer("Laptop", &user).await;
        assert!(registry.is_known(&user));
        assert!(store.load_known_peers().await.unwrap().is_empty());

        store.set_fail_writes(false);
        registry.touch("Laptop", &user).await;
        assert_eq!(store.load_known_peers().await.unwrap().len(), 1);
    }
}

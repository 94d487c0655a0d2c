//! Test fixtures and helpers.
//!
//! Common setup code for multi-device integration tests.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use uuid::Uuid;

use huddle::{
    get_or_create_local_identity, Node, NodeConfig, NodeEvent, NodeHandle, PeerState,
    RemotePeerRecord,
};
use huddle_core::{now_millis, ChatMessage, KnownPeer, LocalIdentity, UserId};
use huddle_store::{MemoryStore, StoreExt};
use huddle_sync::MemoryNetwork;

/// How long helpers wait before failing a test.
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Install a test-friendly tracing subscriber. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

/// A user message with a deterministic id.
pub fn message(sender: &UserId, n: u128, timestamp: i64) -> ChatMessage {
    let mut message = ChatMessage::local(sender, "test", format!("message {}", n));
    message.id = Uuid::from_u128(n);
    message.timestamp = timestamp;
    message
}

/// Record `peer` as a known, sync-enabled peer in `store`.
pub async fn remember(store: &MemoryStore, peer: &LocalIdentity) {
    let mut peers = store.load_known_peers().await.unwrap_or_default();
    peers.retain(|p| p.user_id != peer.user_id);
    peers.push(KnownPeer {
        display_name: peer.display_name().to_string(),
        user_id: peer.user_id.clone(),
        last_seen_at: now_millis(),
        sync_enabled: true,
    });
    store
        .save_known_peers(&peers)
        .await
        .expect("seed known peers");
}

/// Poll `check` until it holds, panicking after [`TIMEOUT`].
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + TIMEOUT;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

/// A device that has an identity and a store but no running node yet.
pub struct DeviceSetup {
    pub identity: LocalIdentity,
    pub store: Arc<MemoryStore>,
    pub config: NodeConfig,
}

/// A running node and everything needed to inspect it.
pub struct TestDevice {
    pub identity: LocalIdentity,
    pub store: Arc<MemoryStore>,
    pub handle: NodeHandle,
    pub events: mpsc::UnboundedReceiver<NodeEvent>,
}

impl TestDevice {
    pub fn user_id(&self) -> &UserId {
        &self.identity.user_id
    }

    /// Next application event, panicking after [`TIMEOUT`].
    pub async fn next_event(&mut self) -> NodeEvent {
        tokio::time::timeout(TIMEOUT, self.events.recv())
            .await
            .expect("timed out waiting for node event")
            .expect("node event channel closed")
    }

    /// Skip events until one matches.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&NodeEvent) -> bool) -> NodeEvent {
        loop {
            let event = self.next_event().await;
            if pred(&event) {
                return event;
            }
        }
    }

    /// Every event received so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// The record this device keeps for `user`, if any.
    pub async fn record_of(&self, user: &UserId) -> Option<RemotePeerRecord> {
        self.handle
            .peers()
            .await
            .expect("node running")
            .into_iter()
            .find(|r| r.matches_user(user))
    }

    pub async fn is_connected_to(&self, user: &UserId) -> bool {
        self.record_of(user)
            .await
            .is_some_and(|r| r.state == PeerState::Connected)
    }

    pub async fn wait_connected_to(&self, other: &TestDevice) {
        let user = other.user_id().clone();
        eventually("connection", move || {
            let user = user.clone();
            async move { self.is_connected_to(&user).await }
        })
        .await;
    }

    /// Ids of user (non-system) messages, in log order.
    pub async fn user_message_ids(&self) -> Vec<Uuid> {
        self.handle
            .messages()
            .await
            .expect("node running")
            .into_iter()
            .filter(|m| !m.is_system)
            .map(|m| m.id)
            .collect()
    }

    pub async fn system_note_count(&self) -> usize {
        self.handle
            .messages()
            .await
            .expect("node running")
            .iter()
            .filter(|m| m.is_system)
            .count()
    }
}

/// Devices sharing one in-memory network.
pub struct TestMesh {
    pub network: Arc<MemoryNetwork>,
}

impl Default for TestMesh {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMesh {
    pub fn new() -> Self {
        init_tracing();
        Self {
            network: MemoryNetwork::new(),
        }
    }

    /// Create an identity and an empty store for `name`.
    pub async fn prepare(&self, name: &str) -> DeviceSetup {
        let store = Arc::new(MemoryStore::new());
        let config = NodeConfig::named(name);
        let identity = get_or_create_local_identity(store.as_ref(), &config.display_name)
            .await
            .expect("create identity");
        DeviceSetup {
            identity,
            store,
            config,
        }
    }

    /// Start the node for a prepared device.
    pub async fn launch(&self, setup: DeviceSetup) -> TestDevice {
        let DeviceSetup {
            identity,
            store,
            config,
        } = setup;
        let (transport, transport_events) = self
            .network
            .create_transport(identity.device.clone())
            .await;
        let (handle, events) = Node::start(
            config,
            identity.clone(),
            store.clone(),
            Arc::new(transport),
            transport_events,
        )
        .await
        .expect("start node");
        TestDevice {
            identity,
            store,
            handle,
            events,
        }
    }

    pub async fn spawn(&self, name: &str) -> TestDevice {
        let setup = self.prepare(name).await;
        self.launch(setup).await
    }

    /// Two devices that already know each other, sync enabled.
    pub async fn spawn_known_pair(&self, a: &str, b: &str) -> (TestDevice, TestDevice) {
        let (a, b) = self.prepare_known_pair(a, b).await;
        (self.launch(a).await, self.launch(b).await)
    }

    /// Like [`spawn_known_pair`](Self::spawn_known_pair) but leaves the stores
    /// open for seeding before launch.
    pub async fn prepare_known_pair(&self, a: &str, b: &str) -> (DeviceSetup, DeviceSetup) {
        let a = self.prepare(a).await;
        let b = self.prepare(b).await;
        remember(&a.store, &b.identity).await;
        remember(&b.store, &a.identity).await;
        (a, b)
    }
}

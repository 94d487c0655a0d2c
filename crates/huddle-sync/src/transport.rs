//! Transport abstraction for discovery, sessions and data delivery.
//!
//! The transport is a black box that advertises this device, browses for
//! others, carries invitations and delivers bytes. It reports everything it
//! observes as [`TransportEvent`]s on a channel handed out when the transport
//! is created, so the consumer can process them on its own task.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::oneshot;

use huddle_core::{DiscoveryAttributes, PeerHandle};

use crate::error::Result;

/// Session state of one remote peer as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotConnected,
    Connecting,
    Connected,
}

/// One-shot capability to answer an inbound invitation.
///
/// Consumed by [`accept`](Self::accept) or [`reject`](Self::reject), so it can
/// be answered at most once. Dropping it unanswered counts as a rejection.
pub struct InvitationResponder {
    tx: oneshot::Sender<bool>,
}

impl InvitationResponder {
    /// Create a responder and the receiver the transport waits on.
    pub fn new() -> (Self, oneshot::Receiver<bool>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Answer the invitation.
    pub fn respond(self, accept: bool) {
        // The inviter may have timed out already.
        let _ = self.tx.send(accept);
    }

    pub fn accept(self) {
        self.respond(true);
    }

    pub fn reject(self) {
        self.respond(false);
    }
}

impl std::fmt::Debug for InvitationResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvitationResponder")
            .field("answered", &self.tx.is_closed())
            .finish()
    }
}

/// Everything the transport reports, in delivery order.
#[derive(Debug)]
pub enum TransportEvent {
    /// A browsing session found an advertising peer.
    PeerFound {
        handle: PeerHandle,
        attributes: DiscoveryAttributes,
    },
    /// A previously found peer is no longer visible.
    PeerLost { handle: PeerHandle },
    /// A peer invited us to a session.
    InboundInvite {
        handle: PeerHandle,
        context: Bytes,
        responder: InvitationResponder,
    },
    /// Session state with a peer changed.
    SessionStateChanged {
        handle: PeerHandle,
        state: SessionState,
    },
    /// A peer sent us bytes.
    DataReceived { handle: PeerHandle, data: Bytes },
}

/// Transport trait for discovery and session management.
///
/// Implementations must be thread-safe (Send + Sync). No method blocks on a
/// remote answer: outcomes of invitations arrive later as events.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start advertising `identity` with the given attributes.
    async fn advertise(&self, identity: &PeerHandle, attributes: DiscoveryAttributes) -> Result<()>;

    /// Stop advertising.
    async fn stop_advertise(&self);

    /// Start browsing for peers advertising `service_id`.
    async fn browse(&self, service_id: &str) -> Result<()>;

    /// Stop browsing.
    async fn stop_browse(&self);

    /// Invite a peer into the session, attaching `context`.
    async fn invite(&self, peer: &PeerHandle, context: Bytes, timeout: Duration) -> Result<()>;

    /// Send bytes to connected peers.
    ///
    /// Delivers to every listed peer that is connected and reports an error
    /// if any of them was not.
    async fn send(&self, data: Bytes, peers: &[PeerHandle], reliable: bool) -> Result<()>;

    /// Tear down the session and start a fresh one.
    ///
    /// In-flight sends are drained first. Every connected peer observes
    /// `NotConnected`. Advertising and browsing are stopped and must be
    /// restarted by the caller.
    async fn disconnect_all(&self);

    /// Hard cap on simultaneously connected peers.
    fn max_peers(&self) -> usize;
}

/// A simple in-memory transport for testing.
///
/// Devices share a [`MemoryNetwork`]. Discovery is immediate, invitations are
/// answered through the receiver's [`InvitationResponder`], and data is
/// delivered in order over unbounded channels.
pub mod memory {
    use super::*;
    use std::collections::{HashMap, HashSet};
    use std::sync::Arc;
    use tokio::sync::{mpsc, RwLock};

    use crate::error::SyncError;

    /// Default transport peer cap.
    pub const DEFAULT_MAX_PEERS: usize = 8;

    struct Endpoint {
        events: mpsc::UnboundedSender<TransportEvent>,
        advertising: Option<DiscoveryAttributes>,
        browsing: bool,
        in_range: bool,
        sessions: HashSet<PeerHandle>,
    }

    impl Endpoint {
        fn emit(&self, event: TransportEvent) {
            // A dropped receiver just means that device shut down.
            let _ = self.events.send(event);
        }

        fn emit_session(&self, handle: &PeerHandle, state: SessionState) {
            self.emit(TransportEvent::SessionStateChanged {
                handle: handle.clone(),
                state,
            });
        }
    }

    /// Shared state for the memory transport network.
    pub struct MemoryNetwork {
        endpoints: RwLock<HashMap<PeerHandle, Endpoint>>,
        max_peers: usize,
    }

    impl MemoryNetwork {
        /// Create a new memory network.
        pub fn new() -> Arc<Self> {
            Self::with_max_peers(DEFAULT_MAX_PEERS)
        }

        /// Create a network whose transports cap sessions at `max_peers`.
        pub fn with_max_peers(max_peers: usize) -> Arc<Self> {
            Arc::new(Self {
                endpoints: RwLock::new(HashMap::new()),
                max_peers,
            })
        }

        /// Create a transport for `handle` and the channel its events arrive on.
        pub async fn create_transport(
            self: &Arc<Self>,
            handle: PeerHandle,
        ) -> (MemoryTransport, mpsc::UnboundedReceiver<TransportEvent>) {
            let (tx, rx) = mpsc::unbounded_channel();
            self.endpoints.write().await.insert(
                handle.clone(),
                Endpoint {
                    events: tx,
                    advertising: None,
                    browsing: false,
                    in_range: true,
                    sessions: HashSet::new(),
                },
            );
            let transport = MemoryTransport {
                handle,
                network: Arc::clone(self),
            };
            (transport, rx)
        }

        /// Move a device into or out of radio range of everyone else.
        ///
        /// Leaving range drops its sessions and makes it lost to every
        /// browser; entering range makes it found again.
        pub async fn set_in_range(&self, handle: &PeerHandle, in_range: bool) {
            let mut endpoints = self.endpoints.write().await;
            let was_in_range = match endpoints.get_mut(handle) {
                Some(endpoint) => std::mem::replace(&mut endpoint.in_range, in_range),
                None => return,
            };
            if was_in_range == in_range {
                return;
            }

            if !in_range {
                let sessions: Vec<PeerHandle> = endpoints
                    .get(handle)
                    .map(|e| e.sessions.iter().cloned().collect())
                    .unwrap_or_default();
                for peer in sessions {
                    drop_session(&mut endpoints, handle, &peer);
                }
            }

            let others: Vec<PeerHandle> =
                endpoints.keys().filter(|h| *h != handle).cloned().collect();
            for other in others {
                announce(&endpoints, handle, &other, in_range);
                announce(&endpoints, &other, handle, in_range);
            }
        }

        /// Currently connected peers of `handle`.
        pub async fn sessions_of(&self, handle: &PeerHandle) -> Vec<PeerHandle> {
            self.endpoints
                .read()
                .await
                .get(handle)
                .map(|e| e.sessions.iter().cloned().collect())
                .unwrap_or_default()
        }

        async fn finish_invite(&self, from: &PeerHandle, to: &PeerHandle, accepted: bool) {
            let mut endpoints = self.endpoints.write().await;
            let reachable = visible(&endpoints, from, to) || visible(&endpoints, to, from);
            let has_room = [from, to].iter().all(|h| {
                endpoints
                    .get(*h)
                    .is_some_and(|e| e.sessions.len() < self.max_peers)
            });

            if !(accepted && reachable && has_room) {
                tracing::debug!(%from, %to, accepted, reachable, has_room, "invitation not established");
                if let Some(inviter) = endpoints.get(from) {
                    inviter.emit_session(to, SessionState::NotConnected);
                }
                return;
            }

            for (me, peer) in [(from, to), (to, from)] {
                if let Some(endpoint) = endpoints.get_mut(me) {
                    endpoint.emit_session(peer, SessionState::Connecting);
                    endpoint.sessions.insert(peer.clone());
                    endpoint.emit_session(peer, SessionState::Connected);
                }
            }
        }
    }

    /// Whether `observer` can currently see `target` advertising.
    fn visible(endpoints: &HashMap<PeerHandle, Endpoint>, observer: &PeerHandle, target: &PeerHandle) -> bool {
        match (endpoints.get(observer), endpoints.get(target)) {
            (Some(o), Some(t)) => o.in_range && t.in_range && t.advertising.is_some(),
            _ => false,
        }
    }

    /// Tell `observer` that `target` appeared or vanished, if it is browsing.
    fn announce(
        endpoints: &HashMap<PeerHandle, Endpoint>,
        target: &PeerHandle,
        observer: &PeerHandle,
        found: bool,
    ) {
        let (Some(o), Some(t)) = (endpoints.get(observer), endpoints.get(target)) else {
            return;
        };
        if !o.browsing {
            return;
        }
        match (&t.advertising, found) {
            (Some(attributes), true) if o.in_range && t.in_range => {
                o.emit(TransportEvent::PeerFound {
                    handle: target.clone(),
                    attributes: attributes.clone(),
                });
            }
            (Some(_), false) => o.emit(TransportEvent::PeerLost {
                handle: target.clone(),
            }),
            _ => {}
        }
    }

    fn drop_session(endpoints: &mut HashMap<PeerHandle, Endpoint>, a: &PeerHandle, b: &PeerHandle) {
        for (me, peer) in [(a, b), (b, a)] {
            if let Some(endpoint) = endpoints.get_mut(me) {
                if endpoint.sessions.remove(peer) {
                    endpoint.emit_session(peer, SessionState::NotConnected);
                }
            }
        }
    }

    /// In-memory transport implementation.
    pub struct MemoryTransport {
        handle: PeerHandle,
        network: Arc<MemoryNetwork>,
    }

    impl MemoryTransport {
        /// This device's handle on the network.
        pub fn handle(&self) -> &PeerHandle {
            &self.handle
        }

        /// The shared network.
        pub fn network(&self) -> &Arc<MemoryNetwork> {
            &self.network
        }
    }

    #[async_trait]
    impl Transport for MemoryTransport {
        async fn advertise(&self, identity: &PeerHandle, attributes: DiscoveryAttributes) -> Result<()> {
            if identity != &self.handle {
                return Err(SyncError::TransportUnavailable(format!(
                    "transport bound to {}, cannot advertise {}",
                    self.handle, identity
                )));
            }
            let mut endpoints = self.network.endpoints.write().await;
            let endpoint = endpoints
                .get_mut(&self.handle)
                .ok_or_else(|| SyncError::TransportUnavailable("endpoint removed".into()))?;
            endpoint.advertising = Some(attributes);

            let others: Vec<PeerHandle> =
                endpoints.keys().filter(|h| *h != &self.handle).cloned().collect();
            for other in others {
                announce(&endpoints, &self.handle, &other, true);
            }
            Ok(())
        }

        async fn stop_advertise(&self) {
            let mut endpoints = self.network.endpoints.write().await;
            let others: Vec<PeerHandle> =
                endpoints.keys().filter(|h| *h != &self.handle).cloned().collect();
            for other in &others {
                announce(&endpoints, &self.handle, other, false);
            }
            if let Some(endpoint) = endpoints.get_mut(&self.handle) {
                endpoint.advertising = None;
            }
        }

        async fn browse(&self, _service_id: &str) -> Result<()> {
            let mut endpoints = self.network.endpoints.write().await;
            let endpoint = endpoints
                .get_mut(&self.handle)
                .ok_or_else(|| SyncError::TransportUnavailable("endpoint removed".into()))?;
            endpoint.browsing = true;

            let others: Vec<PeerHandle> =
                endpoints.keys().filter(|h| *h != &self.handle).cloned().collect();
            for other in others {
                announce(&endpoints, &other, &self.handle, true);
            }
            Ok(())
        }

        async fn stop_browse(&self) {
            if let Some(endpoint) = self.network.endpoints.write().await.get_mut(&self.handle) {
                endpoint.browsing = false;
            }
        }

        async fn invite(&self, peer: &PeerHandle, context: Bytes, timeout: Duration) -> Result<()> {
            let endpoints = self.network.endpoints.read().await;
            if !visible(&endpoints, &self.handle, peer) && !visible(&endpoints, peer, &self.handle) {
                return Err(SyncError::PeerNotConnected(peer.to_string()));
            }
            let target = endpoints
                .get(peer)
                .ok_or_else(|| SyncError::PeerNotConnected(peer.to_string()))?;

            let (responder, rx) = InvitationResponder::new();
            target.emit(TransportEvent::InboundInvite {
                handle: self.handle.clone(),
                context,
                responder,
            });
            drop(endpoints);

            let network = Arc::clone(&self.network);
            let from = self.handle.clone();
            let to = peer.clone();
            tokio::spawn(async move {
                let accepted = matches!(tokio::time::timeout(timeout, rx).await, Ok(Ok(true)));
                network.finish_invite(&from, &to, accepted).await;
            });
            Ok(())
        }

        async fn send(&self, data: Bytes, peers: &[PeerHandle], _reliable: bool) -> Result<()> {
            let endpoints = self.network.endpoints.read().await;
            let sessions = endpoints
                .get(&self.handle)
                .map(|e| e.sessions.clone())
                .unwrap_or_default();

            let mut missing = Vec::new();
            for peer in peers {
                match endpoints.get(peer) {
                    Some(target) if sessions.contains(peer) => {
                        target.emit(TransportEvent::DataReceived {
                            handle: self.handle.clone(),
                            data: data.clone(),
                        });
                    }
                    _ => missing.push(peer.to_string()),
                }
            }

            if missing.is_empty() {
                Ok(())
            } else {
                Err(SyncError::PeerNotConnected(missing.join(", ")))
            }
        }

        async fn disconnect_all(&self) {
            let mut endpoints = self.network.endpoints.write().await;
            let sessions: Vec<PeerHandle> = endpoints
                .get(&self.handle)
                .map(|e| e.sessions.iter().cloned().collect())
                .unwrap_or_default();
            for peer in &sessions {
                drop_session(&mut endpoints, &self.handle, peer);
            }

            let others: Vec<PeerHandle> =
                endpoints.keys().filter(|h| *h != &self.handle).cloned().collect();
            for other in &others {
                announce(&endpoints, &self.handle, other, false);
            }
            if let Some(endpoint) = endpoints.get_mut(&self.handle) {
                endpoint.advertising = None;
                endpoint.browsing = false;
            }
        }

        fn max_peers(&self) -> usize {
            self.network.max_peers
        }
    }
}

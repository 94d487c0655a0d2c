//! The node actor.
//!
//! One task owns every piece of mutable state: the peer table, the registry,
//! the message log, memory records and pending conflicts. Application
//! commands and transport events are both delivered to it over channels and
//! handled one at a time, so no state is ever shared across threads.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_core::{
    should_initiate, ChatMessage, DiscoveryAttributes, LocalIdentity, MemoryRecord, MessageLog,
    PeerHandle, PeerState, UserId, ATTR_USER_ID,
};
use huddle_store::{Store, StoreExt};
use huddle_sync::{
    decode_invitation, encode_invitation, log_digest, DecisionOutcome, InvitationResponder,
    MemorySet, MessageSync, SessionState, SyncError, SyncMessage, SyncOutcome, Transport,
    TransportEvent, WireMessage,
};

use crate::config::NodeConfig;
use crate::error::{NodeError, Result};
use crate::handle::{Command, NodeEvent, NodeHandle};
use crate::peers::{PeerTable, Transition};
use crate::registry::Registry;

mod forget;

/// The coordination actor for one device.
pub struct Node {
    config: NodeConfig,
    identity: LocalIdentity,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    registry: Registry,
    peers: PeerTable,
    log: MessageLog,
    memories: MemorySet,
    sync: MessageSync,
    /// Inbound invitations waiting for the user.
    invitations: HashMap<PeerHandle, InvitationResponder>,
    advertising: bool,
    browsing: bool,
    capacity_warned: bool,
    events: mpsc::UnboundedSender<NodeEvent>,
}

impl Node {
    /// Load persisted state and spawn the actor on the current runtime.
    ///
    /// `transport_events` must be the event channel of `transport`. Returns
    /// the command handle and the application event stream.
    pub async fn start(
        config: NodeConfig,
        identity: LocalIdentity,
        store: Arc<dyn Store>,
        transport: Arc<dyn Transport>,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Result<(NodeHandle, mpsc::UnboundedReceiver<NodeEvent>)> {
        let registry = Registry::load(Arc::clone(&store)).await?;
        let mut log = MessageLog::from_messages(store.load_messages().await?);
        log.sort_by_timestamp();
        let memories = MemorySet::from_records(store.load_memories().await?);

        let (command_tx, command_rx) = mpsc::channel(config.event_buffer.max(1));
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        info!(
            user = %identity.user_id,
            device = %identity.device,
            messages = log.len(),
            memories = memories.len(),
            "starting node"
        );

        let node = Self {
            sync: MessageSync::new(identity.user_id.clone(), config.sync.clone()),
            config,
            identity,
            store,
            transport,
            registry,
            peers: PeerTable::new(),
            log,
            memories,
            invitations: HashMap::new(),
            advertising: false,
            browsing: false,
            capacity_warned: false,
            events: event_tx,
        };
        tokio::spawn(node.run(command_rx, transport_events));

        Ok((NodeHandle::new(command_tx), event_rx))
    }

    /// Main event loop.
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) {
        let mut transport_open = true;
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        self.shutdown().await;
                        let _ = reply.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                event = transport_events.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport_event(event).await,
                    None => {
                        warn!("transport event channel closed");
                        transport_open = false;
                    }
                },
            }
        }
        info!(user = %self.identity.user_id, "node stopped");
    }

    async fn shutdown(&mut self) {
        for (_, responder) in self.invitations.drain() {
            responder.reject();
        }
        if self.advertising {
            self.transport.stop_advertise().await;
            self.advertising = false;
        }
        if self.browsing {
            self.transport.stop_browse().await;
            self.browsing = false;
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Commands
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::StartAdvertising { reply } => {
                let _ = reply.send(self.start_advertising().await);
            }
            Command::StopAdvertising { reply } => {
                self.transport.stop_advertise().await;
                self.advertising = false;
                let _ = reply.send(Ok(()));
            }
            Command::StartBrowsing { reply } => {
                let _ = reply.send(self.start_browsing().await);
            }
            Command::StopBrowsing { reply } => {
                self.transport.stop_browse().await;
                self.browsing = false;
                let _ = reply.send(Ok(()));
            }
            Command::Invite { handle, reply } => {
                let _ = reply.send(self.invite(&handle).await);
            }
            Command::RespondToInvitation { handle, accept, reply } => {
                let _ = reply.send(self.respond_to_invitation(&handle, accept));
            }
            Command::SendMessage { content, reply } => {
                let _ = reply.send(Ok(self.send_message(content).await));
            }
            Command::AddMemory { content, category, reply } => {
                let _ = reply.send(Ok(self.add_memory(content, category).await));
            }
            Command::ResolveConflict { handle, use_remote, reply } => {
                let _ = reply.send(self.resolve_conflict(&handle, use_remote).await);
            }
            Command::Forget { user_id, also_block, reply } => {
                self.forget(&user_id, also_block).await;
                let _ = reply.send(Ok(()));
            }
            Command::Block { user_id, reply } => {
                self.registry.block(&user_id).await;
                let _ = reply.send(Ok(()));
            }
            Command::Unblock { user_id, reply } => {
                self.registry.unblock(&user_id).await;
                let _ = reply.send(Ok(()));
            }
            Command::SetSyncEnabled { user_id, enabled, reply } => {
                let _ = reply.send(Ok(self.registry.set_sync_enabled(&user_id, enabled).await));
            }
            Command::DisconnectPeer { handle, reply } => {
                let _ = reply.send(self.disconnect_peer(&handle).await);
            }
            Command::Identity { reply } => {
                let _ = reply.send(Ok(self.identity.clone()));
            }
            Command::Peers { reply } => {
                let _ = reply.send(Ok(self.peers.snapshot()));
            }
            Command::Messages { reply } => {
                let _ = reply.send(Ok(self.log.messages().to_vec()));
            }
            Command::Memories { reply } => {
                let _ = reply.send(Ok(self.memories.records().to_vec()));
            }
            Command::KnownPeers { reply } => {
                let _ = reply.send(Ok(self.registry.known_peers()));
            }
            Command::BlockedUsers { reply } => {
                let _ = reply.send(Ok(self.registry.blocked().iter().cloned().collect()));
            }
            Command::PendingConflicts { reply } => {
                let _ = reply.send(Ok(self.sync.pending_peers()));
            }
            Command::Digest { reply } => {
                let _ = reply.send(Ok(log_digest(&self.log)));
            }
            Command::Shutdown { reply } => {
                // Handled by the run loop.
                let _ = reply.send(Ok(()));
            }
        }
    }

    async fn start_advertising(&mut self) -> Result<()> {
        let attributes = self.identity.discovery_attributes();
        if let Err(e) = self.transport.advertise(&self.identity.device, attributes).await {
            self.transport_failed("advertise", &e);
            return Err(e.into());
        }
        self.advertising = true;
        info!(device = %self.identity.device, "advertising");
        Ok(())
    }

    async fn start_browsing(&mut self) -> Result<()> {
        if let Err(e) = self.transport.browse(&self.config.service_id).await {
            self.transport_failed("browse", &e);
            return Err(e.into());
        }
        self.browsing = true;
        info!(service = %self.config.service_id, "browsing");
        Ok(())
    }

    /// Send an invitation carrying our identity.
    async fn invite(&mut self, handle: &PeerHandle) -> Result<()> {
        let record = self
            .peers
            .get(handle)
            .ok_or_else(|| NodeError::UnknownPeer(handle.clone()))?;
        if !record.state.is_invitable() {
            return Err(NodeError::InvalidState {
                handle: handle.clone(),
                state: record.state,
                action: "invite",
            });
        }

        let context = encode_invitation(&self.identity.invitation_context())?;
        if let Err(e) = self
            .transport
            .invite(handle, context, self.config.invite_timeout)
            .await
        {
            self.transport_failed("invite", &e);
            return Err(e.into());
        }

        let transition = self.peers.on_invite_sent(handle)?;
        self.emit_transition(&transition);
        info!(peer = %handle, "invited peer");
        Ok(())
    }

    fn respond_to_invitation(&mut self, handle: &PeerHandle, accept: bool) -> Result<()> {
        let responder = self
            .invitations
            .remove(handle)
            .ok_or_else(|| NodeError::NoPendingInvitation(handle.clone()))?;

        if accept {
            info!(peer = %handle, "invitation accepted");
            responder.accept();
        } else {
            info!(peer = %handle, "invitation rejected");
            responder.reject();
            if let Some(transition) = self.peers.on_invitation_declined(handle) {
                self.emit_transition(&transition);
            }
        }
        Ok(())
    }

    async fn send_message(&mut self, content: String) -> ChatMessage {
        let message = ChatMessage::local(&self.identity.user_id, self.identity.display_name(), content);
        self.log.push(message.clone());
        self.persist_messages().await;
        self.emit(NodeEvent::MessagesChanged);

        let targets = self.sync_targets();
        if let Err(e) = self.send_to(WireMessage::Chat(message.clone()), &targets).await {
            debug!(error = %e, "chat message not delivered to every peer");
        }
        message
    }

    async fn add_memory(&mut self, content: String, category: Option<String>) -> MemoryRecord {
        let mut record = MemoryRecord::new(content);
        if let Some(category) = category {
            record = record.with_category(category);
        }
        self.memories.add(record.clone());
        self.persist_memories().await;
        self.emit(NodeEvent::MemoriesChanged);

        let targets = self.sync_targets();
        if let Err(e) = self.send_to(WireMessage::Memory(record.clone()), &targets).await {
            debug!(error = %e, "memory record not delivered to every peer");
        }
        record
    }

    /// Send our decision to the peer, then apply it locally.
    async fn resolve_conflict(&mut self, handle: &PeerHandle, use_remote: bool) -> Result<DecisionOutcome> {
        let decision = self.sync.begin_resolve(handle, use_remote)?;
        self.send_to(decision.into(), std::slice::from_ref(handle)).await?;

        let outcome = self.sync.apply_resolution(handle, use_remote, &mut self.log)?;
        info!(peer = %handle, use_remote, ?outcome, "conflict resolved locally");
        self.persist_messages().await;
        self.emit(NodeEvent::MessagesChanged);
        self.emit(NodeEvent::ConflictResolved {
            handle: handle.clone(),
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Drop a single session by recreating the transport session.
    async fn disconnect_peer(&mut self, handle: &PeerHandle) -> Result<()> {
        let record = self
            .peers
            .get(handle)
            .ok_or_else(|| NodeError::UnknownPeer(handle.clone()))?;
        if record.state != PeerState::Connected {
            return Err(NodeError::InvalidState {
                handle: handle.clone(),
                state: record.state,
                action: "disconnect",
            });
        }
        info!(peer = %handle, "disconnecting peer");
        self.recreate_session().await;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transport events
    // ─────────────────────────────────────────────────────────────────────────

    async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::PeerFound { handle, attributes } => {
                self.on_peer_found(handle, attributes).await;
            }
            TransportEvent::PeerLost { handle } => self.on_peer_lost(&handle),
            TransportEvent::InboundInvite {
                handle,
                context,
                responder,
            } => self.on_inbound_invite(handle, context, responder).await,
            TransportEvent::SessionStateChanged { handle, state } => {
                self.on_session_state(handle, state).await;
            }
            TransportEvent::DataReceived { handle, data } => self.on_data(handle, data).await,
        }
    }

    async fn on_peer_found(&mut self, handle: PeerHandle, attributes: DiscoveryAttributes) {
        if handle == self.identity.device {
            return;
        }
        let user = attributes.get(ATTR_USER_ID).map(|id| UserId::new(id.clone()));
        if user.as_ref() == Some(&self.identity.user_id) {
            return;
        }

        let transition = self.peers.on_found(&handle, attributes);
        self.emit_transition(&transition);

        if let Some(user) = &user {
            let name = self.peer_name(&transition.handle);
            if self.registry.observe(&name, user).await {
                info!(peer = %transition.handle, user = %user, "recorded new peer on first sighting");
            }
        }
        self.maybe_auto_invite(&transition.handle).await;
    }

    /// Invite a known, sync-enabled peer if we are the elected initiator.
    async fn maybe_auto_invite(&mut self, handle: &PeerHandle) {
        let Some(record) = self.peers.get(handle) else {
            return;
        };
        if !record.state.is_invitable() {
            return;
        }
        let Some(user) = record.user_id() else {
            return;
        };
        if !self.registry.should_auto_connect(&user) {
            return;
        }
        if !should_initiate(&self.identity.user_id, &user) {
            debug!(peer = %handle, user = %user, "waiting for peer to invite");
            return;
        }
        if let Err(e) = self.invite(handle).await {
            debug!(peer = %handle, error = %e, "auto-invite failed");
        }
    }

    fn on_peer_lost(&mut self, handle: &PeerHandle) {
        let registry = &self.registry;
        if let Some(transition) = self.peers.on_lost(handle, |user| registry.is_known(user)) {
            self.emit_transition(&transition);
        }
    }

    async fn on_inbound_invite(&mut self, handle: PeerHandle, context: Bytes, responder: InvitationResponder) {
        let context = match decode_invitation(&context) {
            Ok(context) => context,
            Err(e) => {
                warn!(peer = %handle, error = %e, "rejecting invitation with undecodable context");
                responder.reject();
                return;
            }
        };
        let user = context.user_id.clone();

        if user == self.identity.user_id {
            responder.reject();
            return;
        }
        if self.registry.is_blocked(&user) {
            info!(peer = %handle, user = %user, "rejecting invitation from blocked user");
            responder.reject();
            return;
        }
        let connected = self.peers.is_user_connected(&user)
            || self
                .peers
                .get(&handle)
                .is_some_and(|r| r.state == PeerState::Connected);
        if connected {
            debug!(peer = %handle, user = %user, "rejecting redundant invitation");
            responder.reject();
            return;
        }

        let transition = self.peers.on_inbound_invite(&handle, context.to_attributes());
        self.emit_transition(&transition);

        // An invitation may arrive before discovery has shown us the sender.
        if self.registry.observe(&context.user_name, &user).await {
            info!(peer = %handle, user = %user, "recorded new peer from invitation");
        }
        if self.registry.should_auto_connect(&user) {
            info!(peer = %handle, user = %user, "auto-accepting invitation from known peer");
            responder.accept();
            return;
        }

        // A newer invitation from the same handle supersedes the old one.
        self.invitations.insert(handle.clone(), responder);
        self.emit(NodeEvent::InvitationReceived {
            handle,
            user_id: user,
            user_name: context.user_name,
        });
    }

    async fn on_session_state(&mut self, handle: PeerHandle, state: SessionState) {
        let registry = &self.registry;
        let Some(transition) = self
            .peers
            .on_session(&handle, state, |user| registry.is_known(user))
        else {
            return;
        };
        self.emit_transition(&transition);

        if state != SessionState::Connecting {
            self.invitations.remove(&handle);
        }
        if transition.became_connected() {
            self.on_connected(&handle).await;
        } else if transition.left_connected() {
            info!(peer = %handle, "session ended");
            self.check_capacity();
        }
    }

    /// Record the peer as known and exchange full histories.
    async fn on_connected(&mut self, handle: &PeerHandle) {
        info!(peer = %handle, "session connected");
        if let Some(record) = self.peers.get(handle) {
            if let Some(user) = record.user_id() {
                let name = record.display_name().to_string();
                self.registry.upsert_known_peer(&name, &user).await;
            }
        }
        self.check_capacity();

        let peers = std::slice::from_ref(handle);
        let messages = self.sync.outbound_sync(&self.log);
        let memories = self.memories.outbound_sync();
        for message in [messages, memories] {
            if let Err(e) = self.send_to(message.into(), peers).await {
                debug!(peer = %handle, error = %e, "initial sync not delivered");
            }
        }
    }

    async fn on_data(&mut self, handle: PeerHandle, data: Bytes) {
        let message = match WireMessage::decode(&data) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer = %handle, error = %e, len = data.len(), "dropping undecodable payload");
                return;
            }
        };

        let user = self.peers.get(&handle).and_then(|r| r.user_id());
        if user.as_ref().is_some_and(|u| self.registry.is_blocked(u)) {
            debug!(peer = %handle, "ignoring payload from blocked user");
            return;
        }
        let history = self.history_allowed(user.as_ref());

        match message {
            WireMessage::Control(SyncMessage::SyncDecision { use_remote }) => {
                self.on_decision(&handle, use_remote).await;
            }
            WireMessage::Control(SyncMessage::ForgetDevice { user_id }) => {
                self.on_forget_request(&handle, user_id).await;
            }
            WireMessage::Control(SyncMessage::Sync { messages }) if history => {
                self.on_sync(&handle, messages).await;
            }
            WireMessage::Control(SyncMessage::SyncMemories { memories }) if history => {
                let added = self.memories.on_sync(memories);
                if added > 0 {
                    info!(peer = %handle, added, "merged memory records");
                    self.persist_memories().await;
                    self.emit(NodeEvent::MemoriesChanged);
                }
            }
            WireMessage::Memory(record) if history => {
                if self.memories.on_record(record) {
                    self.persist_memories().await;
                    self.emit(NodeEvent::MemoriesChanged);
                }
            }
            WireMessage::Chat(message) if history => {
                if message.is_system {
                    return;
                }
                if self.log.push(message.rebased_for(&self.identity.user_id)) {
                    self.persist_messages().await;
                    self.emit(NodeEvent::MessagesChanged);
                }
            }
            _ => debug!(peer = %handle, "sync disabled for peer, ignoring payload"),
        }
    }

    async fn on_sync(&mut self, handle: &PeerHandle, messages: Vec<ChatMessage>) {
        let name = self.peer_name(handle);
        let before = self.log.len();
        match self.sync.on_sync(handle, &name, &mut self.log, messages) {
            SyncOutcome::Conflict {
                local_only,
                remote_only,
            } => {
                self.emit(NodeEvent::ConflictDetected {
                    handle: handle.clone(),
                    peer_name: name,
                    local_only,
                    remote_only,
                });
            }
            SyncOutcome::Merged { .. } => {
                self.persist_messages().await;
                self.emit(NodeEvent::MessagesChanged);
            }
            SyncOutcome::UpToDate => {
                if self.log.len() != before {
                    self.persist_messages().await;
                    self.emit(NodeEvent::MessagesChanged);
                }
            }
        }
    }

    async fn on_decision(&mut self, handle: &PeerHandle, use_remote: bool) {
        let name = self.peer_name(handle);
        let outcome = self.sync.on_decision(handle, &name, use_remote, &mut self.log);
        if outcome == DecisionOutcome::NoPending {
            return;
        }
        info!(peer = %handle, use_remote, ?outcome, "applied peer's conflict decision");
        self.persist_messages().await;
        self.emit(NodeEvent::MessagesChanged);
        self.emit(NodeEvent::ConflictResolved {
            handle: handle.clone(),
            outcome,
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Helpers
    // ─────────────────────────────────────────────────────────────────────────

    fn emit(&self, event: NodeEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    fn emit_transition(&self, transition: &Transition) {
        if !transition.is_change() {
            return;
        }
        self.emit(NodeEvent::PeerStateChanged {
            handle: transition.handle.clone(),
            user_id: transition.user_id.clone(),
            state: transition.to,
        });
    }

    fn transport_failed(&self, operation: &str, error: &SyncError) {
        warn!(operation, error = %error, "transport operation failed");
        self.emit(NodeEvent::SystemNotice(format!("{} failed: {}", operation, error)));
    }

    fn check_capacity(&mut self) {
        let connected = self.peers.connected_count();
        if connected < self.config.capacity_warning_threshold {
            self.capacity_warned = false;
            return;
        }
        if !self.capacity_warned {
            self.capacity_warned = true;
            let max = self.transport.max_peers().min(self.config.max_peers);
            warn!(connected, max, "approaching peer capacity");
            self.emit(NodeEvent::CapacityWarning { connected, max });
        }
    }

    /// Whether history (sync, memories, live traffic) flows with `user`.
    /// Unidentified peers and unknown users are allowed; known users only
    /// while sync is enabled for them.
    fn history_allowed(&self, user: Option<&UserId>) -> bool {
        match user {
            Some(user) => !self.registry.is_known(user) || self.registry.is_sync_enabled(user),
            None => true,
        }
    }

    fn sync_targets(&self) -> Vec<PeerHandle> {
        self.peers
            .connected_handles()
            .into_iter()
            .filter(|h| {
                let user = self.peers.get(h).and_then(|r| r.user_id());
                self.history_allowed(user.as_ref())
            })
            .collect()
    }

    fn peer_name(&self, handle: &PeerHandle) -> String {
        self.peers
            .get(handle)
            .map(|r| r.display_name().to_string())
            .unwrap_or_else(|| handle.display_name().to_string())
    }

    async fn send_to(&self, message: WireMessage, peers: &[PeerHandle]) -> Result<()> {
        if peers.is_empty() {
            return Ok(());
        }
        let bytes = message.encode()?;
        if let Err(e) = self.transport.send(bytes, peers, true).await {
            self.transport_failed("send", &e);
            return Err(e.into());
        }
        Ok(())
    }

    async fn persist_messages(&self) {
        if let Err(e) = self.store.save_messages(self.log.messages()).await {
            warn!(error = %e, "failed to persist message log");
        }
    }

    async fn persist_memories(&self) {
        if let Err(e) = self.store.save_memories(self.memories.records()).await {
            warn!(error = %e, "failed to persist memory records");
        }
    }

    /// Tear down every session and resume advertising and browsing.
    async fn recreate_session(&mut self) {
        self.transport.disconnect_all().await;
        if self.advertising {
            self.advertising = false;
            if let Err(e) = self.start_advertising().await {
                debug!(error = %e, "could not resume advertising");
            }
        }
        if self.browsing {
            self.browsing = false;
            if let Err(e) = self.start_browsing().await {
                debug!(error = %e, "could not resume browsing");
            }
        }
    }
}

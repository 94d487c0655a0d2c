//! Application-facing handle and events.
//!
//! A [`NodeHandle`] is a cheap, cloneable sender of [`Command`]s to the node
//! actor. Every command carries a oneshot reply channel.

use tokio::sync::{mpsc, oneshot};

use huddle_core::{
    ChatMessage, KnownPeer, LocalIdentity, MemoryRecord, PeerHandle, PeerState, RemotePeerRecord,
    UserId,
};
use huddle_sync::{DecisionOutcome, LogDigest};

use crate::error::{NodeError, Result};

type Reply<T> = oneshot::Sender<Result<T>>;

/// Commands that can be sent to the node actor.
#[derive(Debug)]
pub enum Command {
    StartAdvertising { reply: Reply<()> },
    StopAdvertising { reply: Reply<()> },
    StartBrowsing { reply: Reply<()> },
    StopBrowsing { reply: Reply<()> },
    /// Manually invite a discovered peer.
    Invite { handle: PeerHandle, reply: Reply<()> },
    /// Answer a pending inbound invitation.
    RespondToInvitation {
        handle: PeerHandle,
        accept: bool,
        reply: Reply<()>,
    },
    SendMessage { content: String, reply: Reply<ChatMessage> },
    AddMemory {
        content: String,
        category: Option<String>,
        reply: Reply<MemoryRecord>,
    },
    /// Pick a history for a pending conflict with `handle`.
    ResolveConflict {
        handle: PeerHandle,
        use_remote: bool,
        reply: Reply<DecisionOutcome>,
    },
    Forget {
        user_id: UserId,
        also_block: bool,
        reply: Reply<()>,
    },
    Block { user_id: UserId, reply: Reply<()> },
    Unblock { user_id: UserId, reply: Reply<()> },
    SetSyncEnabled {
        user_id: UserId,
        enabled: bool,
        reply: Reply<bool>,
    },
    DisconnectPeer { handle: PeerHandle, reply: Reply<()> },
    Identity { reply: Reply<LocalIdentity> },
    Peers { reply: Reply<Vec<RemotePeerRecord>> },
    Messages { reply: Reply<Vec<ChatMessage>> },
    Memories { reply: Reply<Vec<MemoryRecord>> },
    KnownPeers { reply: Reply<Vec<KnownPeer>> },
    BlockedUsers { reply: Reply<Vec<UserId>> },
    PendingConflicts { reply: Reply<Vec<PeerHandle>> },
    Digest { reply: Reply<LogDigest> },
    Shutdown { reply: Reply<()> },
}

/// Notifications for the surrounding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A peer record changed state; `state` is None when it was removed.
    PeerStateChanged {
        handle: PeerHandle,
        user_id: Option<UserId>,
        state: Option<PeerState>,
    },
    /// An invitation is waiting for the user to accept or reject it.
    InvitationReceived {
        handle: PeerHandle,
        user_id: UserId,
        user_name: String,
    },
    /// Message logs diverged; the user must pick a history.
    ConflictDetected {
        handle: PeerHandle,
        peer_name: String,
        local_only: usize,
        remote_only: usize,
    },
    ConflictResolved {
        handle: PeerHandle,
        outcome: DecisionOutcome,
    },
    MessagesChanged,
    MemoriesChanged,
    /// Transient, user-visible notice such as a transport failure.
    SystemNotice(String),
    /// Connected peers are close to the transport's cap.
    CapacityWarning { connected: usize, max: usize },
    PeerForgotten { user_id: UserId },
}

/// Cloneable handle to a running node.
#[derive(Debug, Clone)]
pub struct NodeHandle {
    commands: mpsc::Sender<Command>,
}

impl NodeHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self { commands }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| NodeError::Closed)?;
        rx.await.map_err(|_| NodeError::Closed)?
    }

    pub async fn start_advertising(&self) -> Result<()> {
        self.request(|reply| Command::StartAdvertising { reply }).await
    }

    pub async fn stop_advertising(&self) -> Result<()> {
        self.request(|reply| Command::StopAdvertising { reply }).await
    }

    pub async fn start_browsing(&self) -> Result<()> {
        self.request(|reply| Command::StartBrowsing { reply }).await
    }

    pub async fn stop_browsing(&self) -> Result<()> {
        self.request(|reply| Command::StopBrowsing { reply }).await
    }

    /// Start advertising and browsing.
    pub async fn start(&self) -> Result<()> {
        self.start_advertising().await?;
        self.start_browsing().await
    }

    pub async fn invite(&self, handle: PeerHandle) -> Result<()> {
        self.request(|reply| Command::Invite { handle, reply }).await
    }

    pub async fn respond_to_invitation(&self, handle: PeerHandle, accept: bool) -> Result<()> {
        self.request(|reply| Command::RespondToInvitation { handle, accept, reply })
            .await
    }

    /// Append a chat message and send it to every connected peer.
    pub async fn send_message(&self, content: impl Into<String>) -> Result<ChatMessage> {
        let content = content.into();
        self.request(|reply| Command::SendMessage { content, reply }).await
    }

    pub async fn add_memory(
        &self,
        content: impl Into<String>,
        category: Option<String>,
    ) -> Result<MemoryRecord> {
        let content = content.into();
        self.request(|reply| Command::AddMemory { content, category, reply })
            .await
    }

    /// Resolve a conflict. `use_remote = true` adopts the peer's history.
    pub async fn resolve_conflict(&self, handle: PeerHandle, use_remote: bool) -> Result<DecisionOutcome> {
        self.request(|reply| Command::ResolveConflict { handle, use_remote, reply })
            .await
    }

    /// Forget a device on both sides, optionally blocking it.
    pub async fn forget(&self, user_id: UserId, also_block: bool) -> Result<()> {
        self.request(|reply| Command::Forget { user_id, also_block, reply })
            .await
    }

    pub async fn block(&self, user_id: UserId) -> Result<()> {
        self.request(|reply| Command::Block { user_id, reply }).await
    }

    pub async fn unblock(&self, user_id: UserId) -> Result<()> {
        self.request(|reply| Command::Unblock { user_id, reply }).await
    }

    /// Returns false if the user is not a known peer.
    pub async fn set_sync_enabled(&self, user_id: UserId, enabled: bool) -> Result<bool> {
        self.request(|reply| Command::SetSyncEnabled { user_id, enabled, reply })
            .await
    }

    pub async fn disconnect_peer(&self, handle: PeerHandle) -> Result<()> {
        self.request(|reply| Command::DisconnectPeer { handle, reply }).await
    }

    pub async fn identity(&self) -> Result<LocalIdentity> {
        self.request(|reply| Command::Identity { reply }).await
    }

    pub async fn peers(&self) -> Result<Vec<RemotePeerRecord>> {
        self.request(|reply| Command::Peers { reply }).await
    }

    pub async fn messages(&self) -> Result<Vec<ChatMessage>> {
        self.request(|reply| Command::Messages { reply }).await
    }

    pub async fn memories(&self) -> Result<Vec<MemoryRecord>> {
        self.request(|reply| Command::Memories { reply }).await
    }

    pub async fn known_peers(&self) -> Result<Vec<KnownPeer>> {
        self.request(|reply| Command::KnownPeers { reply }).await
    }

    pub async fn blocked_users(&self) -> Result<Vec<UserId>> {
        self.request(|reply| Command::BlockedUsers { reply }).await
    }

    pub async fn pending_conflicts(&self) -> Result<Vec<PeerHandle>> {
        self.request(|reply| Command::PendingConflicts { reply }).await
    }

    pub async fn digest(&self) -> Result<LogDigest> {
        self.request(|reply| Command::Digest { reply }).await
    }

    /// Stop the actor. Pending invitations are rejected.
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

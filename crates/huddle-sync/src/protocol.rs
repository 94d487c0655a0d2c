//! Message-log sync protocol.
//!
//! Compares a received log against the local one, auto-merges when one side
//! is a superset, and otherwise parks the received log until the user picks a
//! history. The decision is asymmetric: the side that adopts the other's
//! history replaces its log wholesale, the other side only appends a note.
//!
//! [`MessageSync`] owns no log and does no I/O. The caller passes the log in,
//! sends whatever message comes back and persists afterwards.

use std::collections::HashMap;

use huddle_core::{diff_logs, merge_remote_only, ChatMessage, MessageLog, PeerHandle, UserId};

use crate::error::{Result, SyncError};
use crate::messages::SyncMessage;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Append a system note when an auto-merge found nothing new.
    ///
    /// Notes carry fresh ids and never take part in diffing, so re-applying
    /// a sync still adds no user messages.
    pub note_empty_merges: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            note_empty_merges: true,
        }
    }
}

/// Result of processing a received `sync`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing new arrived.
    UpToDate,
    /// Remote-only messages were appended.
    Merged { added: usize },
    /// Both sides hold messages the other lacks; a decision is pending.
    Conflict { local_only: usize, remote_only: usize },
}

/// Result of applying a conflict decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecisionOutcome {
    /// The local log was kept as is.
    KeptLocal,
    /// The local log was replaced by the peer's.
    AdoptedRemote { messages: usize },
    /// There was no pending conflict with that peer.
    NoPending,
}

#[derive(Debug, Clone)]
struct PendingSync {
    peer_name: String,
    messages: Vec<ChatMessage>,
}

/// Per-peer conflict bookkeeping for one local user.
#[derive(Debug)]
pub struct MessageSync {
    local_user: UserId,
    config: SyncConfig,
    pending: HashMap<PeerHandle, PendingSync>,
}

impl MessageSync {
    pub fn new(local_user: UserId, config: SyncConfig) -> Self {
        Self {
            local_user,
            config,
            pending: HashMap::new(),
        }
    }

    /// The `sync` message announcing our entire log.
    pub fn outbound_sync(&self, log: &MessageLog) -> SyncMessage {
        SyncMessage::Sync {
            messages: log.messages().to_vec(),
        }
    }

    /// Process a peer's full log.
    ///
    /// A conflict replaces any earlier pending snapshot from the same peer.
    /// A non-conflicting sync clears it, since the divergence is gone.
    pub fn on_sync(
        &mut self,
        peer: &PeerHandle,
        peer_name: &str,
        log: &mut MessageLog,
        remote: Vec<ChatMessage>,
    ) -> SyncOutcome {
        let diff = diff_logs(log, &remote);

        if diff.is_conflict() {
            tracing::info!(
                peer = %peer,
                local_only = diff.local_only.len(),
                remote_only = diff.remote_only.len(),
                "message logs diverged"
            );
            self.pending.insert(
                peer.clone(),
                PendingSync {
                    peer_name: peer_name.to_string(),
                    messages: remote,
                },
            );
            return SyncOutcome::Conflict {
                local_only: diff.local_only.len(),
                remote_only: diff.remote_only.len(),
            };
        }

        self.pending.remove(peer);

        let added = if diff.is_up_to_date() {
            0
        } else {
            merge_remote_only(log, diff.remote_only, &self.local_user)
        };
        if added == 0 {
            if self.config.note_empty_merges {
                log.push_system(format!("Already in sync with {}", peer_name));
            }
            return SyncOutcome::UpToDate;
        }
        log.push_system(format!("Synced {} message(s) from {}", added, peer_name));
        tracing::info!(peer = %peer, added, "merged remote messages");
        SyncOutcome::Merged { added }
    }

    /// The decision message to send before applying a local resolution.
    pub fn begin_resolve(&self, peer: &PeerHandle, use_remote: bool) -> Result<SyncMessage> {
        if !self.pending.contains_key(peer) {
            return Err(SyncError::NoPendingConflict(peer.to_string()));
        }
        Ok(SyncMessage::SyncDecision { use_remote })
    }

    /// Apply the local user's decision once it has been sent.
    pub fn apply_resolution(
        &mut self,
        peer: &PeerHandle,
        use_remote: bool,
        log: &mut MessageLog,
    ) -> Result<DecisionOutcome> {
        let pending = self
            .pending
            .remove(peer)
            .ok_or_else(|| SyncError::NoPendingConflict(peer.to_string()))?;

        if use_remote {
            let adopted = self.adopt(log, pending.messages);
            log.push_system(format!("Replaced our history with {}'s", pending.peer_name));
            Ok(DecisionOutcome::AdoptedRemote { messages: adopted })
        } else {
            log.push_system(format!(
                "Kept our history; {} will adopt it",
                pending.peer_name
            ));
            Ok(DecisionOutcome::KeptLocal)
        }
    }

    /// Apply a decision the peer made.
    ///
    /// `use_remote` is from the sender's point of view: `true` means the
    /// sender adopted our history, so ours stays; `false` means the sender
    /// kept its own, so we adopt the snapshot it sent earlier.
    pub fn on_decision(
        &mut self,
        peer: &PeerHandle,
        peer_name: &str,
        use_remote: bool,
        log: &mut MessageLog,
    ) -> DecisionOutcome {
        let Some(pending) = self.pending.remove(peer) else {
            tracing::warn!(peer = %peer, use_remote, "decision received with no pending conflict");
            return DecisionOutcome::NoPending;
        };

        if use_remote {
            log.push_system(format!("{} adopted our history", peer_name));
            DecisionOutcome::KeptLocal
        } else {
            let adopted = self.adopt(log, pending.messages);
            log.push_system(format!("{} kept their history; adopted it", peer_name));
            DecisionOutcome::AdoptedRemote { messages: adopted }
        }
    }

    /// Replace the log with the peer's user messages.
    ///
    /// The peer's own system notes describe its local events, not ours.
    fn adopt(&self, log: &mut MessageLog, messages: Vec<ChatMessage>) -> usize {
        let adopted: Vec<ChatMessage> = messages
            .into_iter()
            .filter(|m| !m.is_system)
            .map(|m| m.rebased_for(&self.local_user))
            .collect();
        log.replace_all(adopted);
        log.len()
    }

    /// Whether any decision is outstanding.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Peers with an outstanding decision.
    pub fn pending_peers(&self) -> Vec<PeerHandle> {
        self.pending.keys().cloned().collect()
    }

    /// The parked remote log for `peer`, if any.
    pub fn pending_for(&self, peer: &PeerHandle) -> Option<&[ChatMessage]> {
        self.pending.get(peer).map(|p| p.messages.as_slice())
    }

    /// Drop any pending decision with `peer`.
    pub fn discard(&mut self, peer: &PeerHandle) -> bool {
        self.pending.remove(peer).is_some()
    }
}

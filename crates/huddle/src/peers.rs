//! Remote peer tracking and the connection state machine.
//!
//! Keeps one [`RemotePeerRecord`] per remote device, at most one per user id,
//! and applies discovery and session events to it. Every method returns the
//! resulting [`Transition`] so the caller can react and notify without
//! re-reading the table.

use std::collections::HashMap;

use huddle_core::{
    DiscoveryAttributes, PeerHandle, PeerState, RemotePeerRecord, UserId, ATTR_USER_ID,
};
use huddle_sync::SessionState;
use tracing::debug;

use crate::error::{NodeError, Result};

/// The effect of one event on one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub handle: PeerHandle,
    pub user_id: Option<UserId>,
    /// State before the event; None if the record was just created.
    pub from: Option<PeerState>,
    /// State after the event; None if the record was removed.
    pub to: Option<PeerState>,
    /// Handle the record was known under before this event, if it changed.
    pub replaced: Option<PeerHandle>,
}

impl Transition {
    fn of(record: &RemotePeerRecord, from: Option<PeerState>) -> Self {
        Self {
            handle: record.handle.clone(),
            user_id: record.user_id(),
            from,
            to: Some(record.state),
            replaced: None,
        }
    }

    fn removed(record: &RemotePeerRecord) -> Self {
        Self {
            handle: record.handle.clone(),
            user_id: record.user_id(),
            from: Some(record.state),
            to: None,
            replaced: None,
        }
    }

    /// Whether the state (or existence) of the record changed.
    pub fn is_change(&self) -> bool {
        self.from != self.to || self.replaced.is_some()
    }

    pub fn is_removal(&self) -> bool {
        self.to.is_none()
    }

    /// The record just reached `Connected`.
    pub fn became_connected(&self) -> bool {
        self.to == Some(PeerState::Connected) && self.from != Some(PeerState::Connected)
    }

    /// The record just left `Connected`.
    pub fn left_connected(&self) -> bool {
        self.from == Some(PeerState::Connected) && self.to != Some(PeerState::Connected)
    }
}

/// Table of observed remote peers.
#[derive(Debug, Default)]
pub struct PeerTable {
    records: HashMap<PeerHandle, RemotePeerRecord>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, handle: &PeerHandle) -> Option<&RemotePeerRecord> {
        self.records.get(handle)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Handle of the record belonging to `user`, if any.
    pub fn find_by_user(&self, user: &UserId) -> Option<&RemotePeerRecord> {
        self.records.values().find(|r| r.matches_user(user))
    }

    pub fn is_user_connected(&self, user: &UserId) -> bool {
        self.records
            .values()
            .any(|r| r.state == PeerState::Connected && r.matches_user(user))
    }

    pub fn connected_handles(&self) -> Vec<PeerHandle> {
        self.records
            .values()
            .filter(|r| r.state == PeerState::Connected)
            .map(|r| r.handle.clone())
            .collect()
    }

    pub fn connected_handles_for(&self, user: &UserId) -> Vec<PeerHandle> {
        self.records
            .values()
            .filter(|r| r.state == PeerState::Connected && r.matches_user(user))
            .map(|r| r.handle.clone())
            .collect()
    }

    /// Connected records that never told us their user id.
    pub fn connected_unidentified_handles(&self) -> Vec<PeerHandle> {
        self.records
            .values()
            .filter(|r| r.state == PeerState::Connected && r.user_id().is_none())
            .map(|r| r.handle.clone())
            .collect()
    }

    pub fn connected_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.state == PeerState::Connected)
            .count()
    }

    /// All records, ordered by display name.
    pub fn snapshot(&self) -> Vec<RemotePeerRecord> {
        let mut records: Vec<RemotePeerRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| {
            a.display_name()
                .cmp(b.display_name())
                .then_with(|| a.handle.nonce().cmp(&b.handle.nonce()))
        });
        records
    }

    /// Discovery found `handle` advertising `attributes`.
    ///
    /// A new handle for a user we already track takes over that user's
    /// record, unless the record is mid-handshake or connected, in which case
    /// only its attributes are refreshed.
    pub fn on_found(&mut self, handle: &PeerHandle, attributes: DiscoveryAttributes) -> Transition {
        if let Some(record) = self.records.get_mut(handle) {
            let from = record.state;
            record.attributes = attributes;
            record.is_nearby = true;
            return Transition::of(record, Some(from));
        }

        if let Some(transition) = self.adopt_handle(handle, &attributes, None) {
            return transition;
        }

        let record = RemotePeerRecord::new(handle.clone(), PeerState::Discovered, attributes);
        debug!(peer = %handle, "peer discovered");
        let transition = Transition::of(&record, None);
        self.records.insert(handle.clone(), record);
        transition
    }

    /// Discovery lost `handle`.
    ///
    /// A connected record stays connected; only the session layer ends a
    /// session. Other records become `Disconnected` if `retain` holds for
    /// their user, otherwise they are removed.
    pub fn on_lost(&mut self, handle: &PeerHandle, retain: impl Fn(&UserId) -> bool) -> Option<Transition> {
        let record = self.records.get_mut(handle)?;
        record.is_nearby = false;
        let from = record.state;
        if from == PeerState::Connected {
            return Some(Transition::of(record, Some(from)));
        }
        Some(self.disconnect_or_remove(handle, from, &retain))
    }

    /// A local invitation to `handle` was handed to the transport.
    pub fn on_invite_sent(&mut self, handle: &PeerHandle) -> Result<Transition> {
        let record = self
            .records
            .get_mut(handle)
            .ok_or_else(|| NodeError::UnknownPeer(handle.clone()))?;
        if !record.state.is_invitable() {
            return Err(NodeError::InvalidState {
                handle: handle.clone(),
                state: record.state,
                action: "invite",
            });
        }
        let from = record.state;
        record.state = PeerState::InvitationSent;
        record.was_connected = false;
        debug!(peer = %handle, from = %from, "invitation sent");
        Ok(Transition::of(record, Some(from)))
    }

    /// `handle` invited us, identifying itself with `attributes`.
    ///
    /// Callers reject invitations from connected users before calling this.
    pub fn on_inbound_invite(&mut self, handle: &PeerHandle, attributes: DiscoveryAttributes) -> Transition {
        if let Some(record) = self.records.get_mut(handle) {
            let from = record.state;
            record.attributes.extend(attributes);
            record.is_nearby = true;
            if from != PeerState::Connected {
                record.state = PeerState::InvitationReceived;
            }
            return Transition::of(record, Some(from));
        }

        if let Some(transition) = self.adopt_handle(handle, &attributes, Some(PeerState::InvitationReceived)) {
            return transition;
        }

        let record = RemotePeerRecord::new(handle.clone(), PeerState::InvitationReceived, attributes);
        let transition = Transition::of(&record, None);
        self.records.insert(handle.clone(), record);
        transition
    }

    /// The local user declined an inbound invitation.
    pub fn on_invitation_declined(&mut self, handle: &PeerHandle) -> Option<Transition> {
        let record = self.records.get_mut(handle)?;
        if record.state != PeerState::InvitationReceived {
            return None;
        }
        record.state = PeerState::Discovered;
        Some(Transition::of(record, Some(PeerState::InvitationReceived)))
    }

    /// The transport reported a session state for `handle`.
    pub fn on_session(
        &mut self,
        handle: &PeerHandle,
        state: SessionState,
        retain: impl Fn(&UserId) -> bool,
    ) -> Option<Transition> {
        match state {
            SessionState::Connecting => {
                let record = self.entry(handle, PeerState::Connecting);
                let from = record.state;
                if from == PeerState::Connected {
                    return None;
                }
                record.state = PeerState::Connecting;
                Some(Transition::of(record, Some(from)))
            }
            SessionState::Connected => {
                let record = self.entry(handle, PeerState::Connecting);
                let from = record.state;
                record.state = PeerState::Connected;
                record.is_nearby = true;
                record.was_connected = true;
                debug!(peer = %handle, from = %from, "session connected");
                Some(Transition::of(record, Some(from)))
            }
            SessionState::NotConnected => {
                let record = self.records.get_mut(handle)?;
                let from = record.state;
                match from {
                    PeerState::InvitationSent if !record.was_connected => {
                        record.state = PeerState::Rejected;
                        debug!(peer = %handle, "invitation declined or timed out");
                        Some(Transition::of(record, Some(from)))
                    }
                    PeerState::InvitationReceived if record.is_nearby => {
                        record.state = PeerState::Discovered;
                        Some(Transition::of(record, Some(from)))
                    }
                    PeerState::Connected
                    | PeerState::Connecting
                    | PeerState::InvitationSent
                    | PeerState::InvitationReceived => Some(self.disconnect_or_remove(handle, from, &retain)),
                    PeerState::Discovered | PeerState::Disconnected | PeerState::Rejected => None,
                }
            }
        }
    }

    /// Reset every record of `user` after a forget: nearby records go back
    /// to `Discovered`, the rest are removed.
    pub fn demote_user(&mut self, user: &UserId) -> Vec<Transition> {
        let handles = self.handles_of(user);
        let mut transitions = Vec::with_capacity(handles.len());
        for handle in handles {
            let Some(record) = self.records.get_mut(&handle) else {
                continue;
            };
            if record.is_nearby {
                let from = record.state;
                record.state = PeerState::Discovered;
                record.was_connected = false;
                transitions.push(Transition::of(record, Some(from)));
            } else if let Some(record) = self.records.remove(&handle) {
                transitions.push(Transition::removed(&record));
            }
        }
        transitions
    }

    /// Remove every record of `user`.
    pub fn remove_user(&mut self, user: &UserId) -> Vec<Transition> {
        self.handles_of(user)
            .into_iter()
            .filter_map(|handle| self.records.remove(&handle))
            .map(|record| Transition::removed(&record))
            .collect()
    }

    fn handles_of(&self, user: &UserId) -> Vec<PeerHandle> {
        self.records
            .values()
            .filter(|r| r.matches_user(user))
            .map(|r| r.handle.clone())
            .collect()
    }

    fn entry(&mut self, handle: &PeerHandle, initial: PeerState) -> &mut RemotePeerRecord {
        self.records
            .entry(handle.clone())
            .or_insert_with(|| RemotePeerRecord::new(handle.clone(), initial, DiscoveryAttributes::new()))
    }

    fn disconnect_or_remove(
        &mut self,
        handle: &PeerHandle,
        from: PeerState,
        retain: &impl Fn(&UserId) -> bool,
    ) -> Transition {
        let keep = self
            .records
            .get(handle)
            .and_then(|r| r.user_id())
            .is_some_and(|user| retain(&user));

        if keep {
            if let Some(record) = self.records.get_mut(handle) {
                record.state = PeerState::Disconnected;
                debug!(peer = %handle, from = %from, "peer disconnected");
                return Transition::of(record, Some(from));
            }
        }

        match self.records.remove(handle) {
            Some(record) => {
                debug!(peer = %handle, from = %from, "peer record removed");
                Transition {
                    from: Some(from),
                    ..Transition::removed(&record)
                }
            }
            None => Transition {
                handle: handle.clone(),
                user_id: None,
                from: Some(from),
                to: None,
                replaced: None,
            },
        }
    }

    /// Move the record of the user named in `attributes` to `handle`, if
    /// that record is idle. `state` overrides its state when given.
    fn adopt_handle(
        &mut self,
        handle: &PeerHandle,
        attributes: &DiscoveryAttributes,
        state: Option<PeerState>,
    ) -> Option<Transition> {
        let user = UserId::new(attributes.get(ATTR_USER_ID)?.clone());
        let existing = self.find_by_user(&user)?.handle.clone();

        let idle = self
            .records
            .get(&existing)
            .is_some_and(|r| r.state.is_invitable());
        if !idle {
            let record = self.records.get_mut(&existing)?;
            let from = record.state;
            record.attributes = attributes.clone();
            record.is_nearby = true;
            return Some(Transition::of(record, Some(from)));
        }

        let mut record = self.records.remove(&existing)?;
        let from = record.state;
        record.handle = handle.clone();
        record.attributes = attributes.clone();
        record.is_nearby = true;
        if let Some(state) = state {
            record.state = state;
        }
        debug!(peer = %handle, previous = %existing, user = %user, "known user rediscovered under new handle");
        let mut transition = Transition::of(&record, Some(from));
        transition.replaced = Some(existing);
        self.records.insert(handle.clone(), record);
        Some(transition)
    }
}

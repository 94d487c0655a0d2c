//! Device forgetting.
//!
//! Forgetting is mutual: the initiator tells the other device, which drops
//! the initiator in turn. The notification is best effort. When no connected
//! record can be matched to the user, it goes to every connected peer that
//! has not identified itself, since one of those may be the user. Peers
//! known to be someone else never receive it: they would forget us too.

use huddle_core::{PeerHandle, UserId};
use huddle_sync::{SyncMessage, WireMessage};
use tracing::{debug, info};

use super::Node;
use crate::handle::NodeEvent;

impl Node {
    /// Forget `user` locally and on the remote side, optionally blocking it.
    pub(super) async fn forget(&mut self, user: &UserId, also_block: bool) {
        let live = self.peers.connected_handles_for(user);
        let targets = if live.is_empty() {
            self.peers.connected_unidentified_handles()
        } else {
            live.clone()
        };
        let request = WireMessage::Control(SyncMessage::ForgetDevice {
            user_id: self.identity.user_id.clone(),
        });
        if let Err(e) = self.send_to(request, &targets).await {
            debug!(user = %user, error = %e, "forget request not delivered");
        }

        self.registry.forget(user).await;
        let transitions = if also_block {
            self.registry.block(user).await;
            self.peers.remove_user(user)
        } else {
            self.peers.demote_user(user)
        };
        for transition in &transitions {
            self.drop_peer_state(&transition.handle);
            self.emit_transition(transition);
        }
        info!(user = %user, also_block, "forgot device");
        self.emit(NodeEvent::PeerForgotten { user_id: user.clone() });

        // The transport can only drop every session at once.
        if !live.is_empty() {
            self.recreate_session().await;
        }
    }

    /// A peer asked to be forgotten. Drop both the user it named and the
    /// sender's own user, without blocking either.
    pub(super) async fn on_forget_request(&mut self, handle: &PeerHandle, requested: UserId) {
        let sender = self.peers.get(handle).and_then(|r| r.user_id());
        info!(peer = %handle, user = %requested, "peer asked to be forgotten");

        let mut users = vec![requested];
        if let Some(sender) = sender {
            if !users.contains(&sender) {
                users.push(sender);
            }
        }
        for user in users {
            if user == self.identity.user_id {
                continue;
            }
            self.forget_locally(&user).await;
        }
    }

    async fn forget_locally(&mut self, user: &UserId) {
        self.registry.forget(user).await;
        for transition in self.peers.demote_user(user) {
            self.drop_peer_state(&transition.handle);
            self.emit_transition(&transition);
        }
        self.emit(NodeEvent::PeerForgotten { user_id: user.clone() });
    }

    fn drop_peer_state(&mut self, handle: &PeerHandle) {
        self.sync.discard(handle);
        if let Some(responder) = self.invitations.remove(handle) {
            responder.reject();
        }
    }
}

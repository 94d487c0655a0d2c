//! Peer records: local identity, discovered remote devices, known users.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{CoreError, Result};
use crate::types::{PeerHandle, UserId};

/// Discovery attribute carrying the advertiser's user id.
pub const ATTR_USER_ID: &str = "userId";

/// Discovery attribute carrying the advertiser's display name.
pub const ATTR_USER_NAME: &str = "userName";

/// Key/value attributes advertised alongside a peer.
pub type DiscoveryAttributes = BTreeMap<String, String>;

/// Durable identity of this process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIdentity {
    /// Stable owner id, generated once.
    pub user_id: UserId,
    /// Device handle, regenerated only when the display name changes.
    pub device: PeerHandle,
}

impl LocalIdentity {
    /// Create a brand-new identity.
    pub fn generate(display_name: impl Into<String>) -> Self {
        Self {
            user_id: UserId::generate(),
            device: PeerHandle::new(display_name),
        }
    }

    /// The device's human-readable name.
    pub fn display_name(&self) -> &str {
        self.device.display_name()
    }

    /// Attributes to advertise during discovery.
    pub fn discovery_attributes(&self) -> DiscoveryAttributes {
        let mut attrs = DiscoveryAttributes::new();
        attrs.insert(ATTR_USER_ID.to_string(), self.user_id.to_string());
        attrs.insert(ATTR_USER_NAME.to_string(), self.display_name().to_string());
        attrs
    }

    /// Context attached to every outbound invitation.
    pub fn invitation_context(&self) -> InvitationContext {
        InvitationContext {
            user_id: self.user_id.clone(),
            user_name: self.display_name().to_string(),
        }
    }
}

/// Identity payload attached to an invitation so the receiver can identify
/// the sender before accepting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvitationContext {
    pub user_id: UserId,
    pub user_name: String,
}

impl InvitationContext {
    /// Recover the context from discovery attributes.
    pub fn from_attributes(attrs: &DiscoveryAttributes) -> Result<Self> {
        let user_id = attrs
            .get(ATTR_USER_ID)
            .ok_or(CoreError::MissingAttribute(ATTR_USER_ID))?;
        let user_name = attrs.get(ATTR_USER_NAME).cloned().unwrap_or_default();
        Ok(Self {
            user_id: UserId::new(user_id.clone()),
            user_name,
        })
    }

    /// Express the context as discovery attributes.
    pub fn to_attributes(&self) -> DiscoveryAttributes {
        let mut attrs = DiscoveryAttributes::new();
        attrs.insert(ATTR_USER_ID.to_string(), self.user_id.to_string());
        attrs.insert(ATTR_USER_NAME.to_string(), self.user_name.clone());
        attrs
    }
}

/// A remote user whose id we have recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownPeer {
    pub display_name: String,
    pub user_id: UserId,
    /// Last sighting, Unix ms.
    pub last_seen_at: i64,
    pub sync_enabled: bool,
}

/// Lifecycle state of an observed remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeerState {
    Discovered,
    Connecting,
    Connected,
    Disconnected,
    InvitationSent,
    InvitationReceived,
    Rejected,
}

impl PeerState {
    /// States from which a local invitation may be sent.
    pub fn is_invitable(&self) -> bool {
        matches!(
            self,
            PeerState::Discovered | PeerState::Disconnected | PeerState::Rejected
        )
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::Discovered => "discovered",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Disconnected => "disconnected",
            PeerState::InvitationSent => "invitation_sent",
            PeerState::InvitationReceived => "invitation_received",
            PeerState::Rejected => "rejected",
        }
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about one observed remote device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePeerRecord {
    /// Current transport handle.
    pub handle: PeerHandle,
    pub state: PeerState,
    /// Latest attributes seen via discovery or invitation.
    pub attributes: DiscoveryAttributes,
    pub is_nearby: bool,
    /// Whether this record has reached `Connected` since it last left it.
    pub was_connected: bool,
}

impl RemotePeerRecord {
    /// Create a record in the given state.
    pub fn new(handle: PeerHandle, state: PeerState, attributes: DiscoveryAttributes) -> Self {
        Self {
            handle,
            state,
            attributes,
            is_nearby: true,
            was_connected: false,
        }
    }

    /// Remote user id, if advertised.
    pub fn user_id(&self) -> Option<UserId> {
        self.attributes.get(ATTR_USER_ID).map(|id| UserId::new(id.clone()))
    }

    /// Whether this record belongs to `user`.
    pub fn matches_user(&self, user: &UserId) -> bool {
        self.attributes
            .get(ATTR_USER_ID)
            .is_some_and(|id| id == user.as_str())
    }

    /// Best display name: advertised user name, else the handle's name.
    pub fn display_name(&self) -> &str {
        self.attributes
            .get(ATTR_USER_NAME)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.handle.display_name())
    }
}

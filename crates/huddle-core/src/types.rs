//! Strong type definitions for huddle identities.
//!
//! Identifiers are newtypes so a transport handle can never be passed where a
//! durable user id is expected.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoreError, Result};

/// Durable identifier of a device owner.
///
/// Locally generated ids are always UUIDs, but ids received from remote
/// devices are kept as the raw string so a malformed id can still be recorded
/// and compared. Use [`UserId::parse_uuid`] when a validated UUID is needed.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Generate a fresh random user id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wrap a raw id string without validation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// The raw id string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse the id as a UUID.
    pub fn parse_uuid(&self) -> Result<Uuid> {
        Uuid::parse_str(&self.0).map_err(|_| CoreError::InvalidUserId(self.0.clone()))
    }

    /// Whether the id is a parseable UUID.
    pub fn is_valid(&self) -> bool {
        self.parse_uuid().is_ok()
    }
}

impl From<Uuid> for UserId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid.to_string())
    }
}

impl fmt::Debug for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UserId({})", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transient transport identity of a device.
///
/// Two handles with the same display name are still distinct devices; the
/// nonce is what the transport uses to tell them apart.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerHandle {
    display_name: String,
    nonce: u64,
}

impl PeerHandle {
    /// Create a handle with a random nonce.
    pub fn new(display_name: impl Into<String>) -> Self {
        use rand::Rng;
        Self {
            display_name: display_name.into(),
            nonce: rand::thread_rng().gen(),
        }
    }

    /// Create a handle from known parts.
    pub fn from_parts(display_name: impl Into<String>, nonce: u64) -> Self {
        Self {
            display_name: display_name.into(),
            nonce,
        }
    }

    /// Human-readable device name advertised by the transport.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Per-instance nonce.
    pub fn nonce(&self) -> u64 {
        self.nonce
    }
}

impl fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerHandle({}#{:08x})", self.display_name, self.nonce as u32)
    }
}

impl fmt::Display for PeerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:08x}", self.display_name, self.nonce as u32)
    }
}

/// Current wall-clock time in Unix milliseconds.
pub fn now_millis() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

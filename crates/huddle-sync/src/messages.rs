//! Wire message types.
//!
//! Payloads are JSON. Control messages carry a `type` discriminator; a payload
//! without one is a single memory record or a single chat message.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use huddle_core::{ChatMessage, InvitationContext, MemoryRecord, UserId};

use crate::error::{Result, SyncError};

/// Tagged control messages exchanged over the reliable channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncMessage {
    /// The sender's entire message log.
    Sync { messages: Vec<ChatMessage> },

    /// The sender's answer to a conflict.
    SyncDecision {
        #[serde(rename = "useRemote")]
        use_remote: bool,
    },

    /// The sender's entire memory set.
    SyncMemories { memories: Vec<MemoryRecord> },

    /// The sender wants both sides to forget each other.
    ForgetDevice {
        #[serde(rename = "userId")]
        user_id: UserId,
    },
}

impl SyncMessage {
    /// Wire name of the variant, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            SyncMessage::Sync { .. } => "sync",
            SyncMessage::SyncDecision { .. } => "sync_decision",
            SyncMessage::SyncMemories { .. } => "sync_memories",
            SyncMessage::ForgetDevice { .. } => "forget_device",
        }
    }
}

/// Anything that can arrive on the data channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireMessage {
    Control(SyncMessage),
    Memory(MemoryRecord),
    Chat(ChatMessage),
}

impl WireMessage {
    /// Encode to JSON bytes.
    pub fn encode(&self) -> Result<Bytes> {
        let encoded = match self {
            WireMessage::Control(msg) => serde_json::to_vec(msg),
            WireMessage::Memory(record) => serde_json::to_vec(record),
            WireMessage::Chat(message) => serde_json::to_vec(message),
        };
        encoded
            .map(Bytes::from)
            .map_err(|e| SyncError::Encode(e.to_string()))
    }

    /// Decode JSON bytes.
    ///
    /// A payload with a `type` field must be a known control message. Without
    /// one it is tried as a memory record first, then as a chat message.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| SyncError::Decode(e.to_string()))?;

        if value.get("type").is_some() {
            return serde_json::from_value(value)
                .map(WireMessage::Control)
                .map_err(|e| SyncError::Decode(e.to_string()));
        }

        if let Ok(record) = serde_json::from_value::<MemoryRecord>(value.clone()) {
            return Ok(WireMessage::Memory(record));
        }

        serde_json::from_value::<ChatMessage>(value)
            .map(WireMessage::Chat)
            .map_err(|e| SyncError::Decode(format!("not a memory record or chat message: {}", e)))
    }
}

impl From<SyncMessage> for WireMessage {
    fn from(msg: SyncMessage) -> Self {
        WireMessage::Control(msg)
    }
}

/// Encode the identity context attached to an invitation.
pub fn encode_invitation(context: &InvitationContext) -> Result<Bytes> {
    serde_json::to_vec(context)
        .map(Bytes::from)
        .map_err(|e| SyncError::Encode(e.to_string()))
}

/// Decode the identity context attached to an invitation.
pub fn decode_invitation(bytes: &[u8]) -> Result<InvitationContext> {
    serde_json::from_slice(bytes).map_err(|e| SyncError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat() -> ChatMessage {
        ChatMessage::local(&UserId::generate(), "Phone", "hello")
    }

    #[test]
    fn test_control_messages_are_tagged() {
        let msg = SyncMessage::SyncDecision { use_remote: true };
        let bytes = WireMessage::from(msg.clone()).encode().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"type": "sync_decision", "useRemote": true}));
        assert_eq!(WireMessage::decode(&bytes).unwrap(), WireMessage::Control(msg));
    }

    #[test]
    fn test_forget_device_shape() {
        let bytes = WireMessage::Control(SyncMessage::ForgetDevice {
            user_id: UserId::new("u-9"),
        })
        .encode()
        .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"type": "forget_device", "userId": "u-9"}));
    }

    #[test]
    fn test_sync_carries_messages() {
        let message = chat();
        let bytes = WireMessage::Control(SyncMessage::Sync {
            messages: vec![message.clone()],
        })
        .encode()
        .unwrap();
        match WireMessage::decode(&bytes).unwrap() {
            WireMessage::Control(SyncMessage::Sync { messages }) => assert_eq!(messages, vec![message]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_untagged_chat_message() {
        let message = chat();
        let bytes = WireMessage::Chat(message.clone()).encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), WireMessage::Chat(message));
    }

    #[test]
    fn test_untagged_memory_record() {
        let record = MemoryRecord::new("allergic to peanuts");
        let bytes = WireMessage::Memory(record.clone()).encode().unwrap();
        assert_eq!(WireMessage::decode(&bytes).unwrap(), WireMessage::Memory(record));
    }

    #[test]
    fn test_unknown_type_is_decode_failure() {
        let bytes = br#"{"type":"reboot"}"#;
        assert!(matches!(WireMessage::decode(bytes), Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_garbage_is_decode_failure() {
        assert!(matches!(WireMessage::decode(b"\x00\x01"), Err(SyncError::Decode(_))));
        assert!(matches!(WireMessage::decode(br#"{"hello":1}"#), Err(SyncError::Decode(_))));
    }

    #[test]
    fn test_invitation_context() {
        let ctx = InvitationContext {
            user_id: UserId::generate(),
            user_name: "Watch".into(),
        };
        let bytes = encode_invitation(&ctx).unwrap();
        assert_eq!(decode_invitation(&bytes).unwrap(), ctx);
        assert!(decode_invitation(b"{}").is_err());
    }
}

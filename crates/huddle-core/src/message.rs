//! Chat messages, the append-only message log, and memory records.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::types::{now_millis, UserId};

/// Sender id used for locally generated system notes.
pub const SYSTEM_SENDER: &str = "system";

/// One entry in the conversation log.
///
/// Field names on the wire are camelCase so payloads stay readable by other
/// implementations of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender_user_id: UserId,
    pub sender_name: String,
    pub content: String,
    pub is_system: bool,
    /// Unix ms.
    pub timestamp: i64,
    pub is_from_local_user: bool,
    pub is_complete: bool,
}

impl ChatMessage {
    /// A complete message authored by the local user.
    pub fn local(sender: &UserId, sender_name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_user_id: sender.clone(),
            sender_name: sender_name.into(),
            content: content.into(),
            is_system: false,
            timestamp: now_millis(),
            is_from_local_user: true,
            is_complete: true,
        }
    }

    /// A locally generated system note.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender_user_id: UserId::new(SYSTEM_SENDER),
            sender_name: "System".to_string(),
            content: content.into(),
            is_system: true,
            timestamp: now_millis(),
            is_from_local_user: false,
            is_complete: true,
        }
    }

    /// Re-derive `is_from_local_user` for a message that arrived from
    /// another device.
    pub fn rebased_for(mut self, local: &UserId) -> Self {
        self.is_from_local_user = !self.is_system && &self.sender_user_id == local;
        self
    }
}

/// Ordered, append-only conversation log.
///
/// Ids are unique within a log; [`MessageLog::push`] ignores duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    messages: Vec<ChatMessage>,
    /// Ids of every entry in `messages`.
    ids: HashSet<Uuid>,
}

impl MessageLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a log from stored messages, dropping duplicate ids.
    pub fn from_messages(messages: Vec<ChatMessage>) -> Self {
        let mut log = Self::new();
        for message in messages {
            log.push(message);
        }
        log
    }

    /// Append a message. Returns false if its id is already present.
    pub fn push(&mut self, message: ChatMessage) -> bool {
        if !self.ids.insert(message.id) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Append a system note.
    pub fn push_system(&mut self, content: impl Into<String>) {
        self.push(ChatMessage::system(content));
    }

    /// Whether a message with this id is present.
    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// Stable sort by timestamp.
    pub fn sort_by_timestamp(&mut self) {
        self.messages.sort_by_key(|m| m.timestamp);
    }

    /// Replace the whole history, then sort.
    pub fn replace_all(&mut self, messages: Vec<ChatMessage>) {
        *self = Self::from_messages(messages);
        self.sort_by_timestamp();
    }

    /// All messages in log order.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// User (non-system) messages in log order.
    pub fn user_messages(&self) -> impl Iterator<Item = &ChatMessage> {
        self.messages.iter().filter(|m| !m.is_system)
    }

    /// Ids of user messages.
    pub fn user_ids(&self) -> HashSet<Uuid> {
        self.user_messages().map(|m| m.id).collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Consume the log.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        self.messages
    }
}

/// A remembered fact, synchronized by naive union.
///
/// `createdAt` is required on the wire; it is what distinguishes an untagged
/// memory record from an untagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryRecord {
    pub id: Uuid,
    pub content: String,
    /// Unix ms.
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

impl MemoryRecord {
    /// A new record timestamped now.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content: content.into(),
            created_at: now_millis(),
            category: None,
        }
    }

    /// Attach a category.
    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg_at(ts: i64) -> ChatMessage {
        let mut m = ChatMessage::local(&UserId::generate(), "Me", format!("at {}", ts));
        m.timestamp = ts;
        m
    }

    #[test]
    fn test_push_ignores_duplicate_ids() {
        let mut log = MessageLog::new();
        let m = msg_at(1);
        assert!(log.push(m.clone()));
        assert!(!log.push(m));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_id_index_follows_contents() {
        let sender = UserId::generate();
        let old = ChatMessage::local(&sender, "A", "old");
        let new = ChatMessage::local(&sender, "A", "new");
        let mut log = MessageLog::from_messages(vec![old.clone()]);
        log.push_system("note");
        let note = log.messages()[1].clone();
        assert!(log.contains(&note.id));
        assert!(!log.push(note));

        log.replace_all(vec![new.clone()]);
        assert!(log.contains(&new.id));
        assert!(!log.contains(&old.id));
        assert!(log.push(old));
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_replace_all_sorts() {
        let mut log = MessageLog::new();
        log.push(msg_at(10));
        log.replace_all(vec![msg_at(3), msg_at(1), msg_at(2)]);
        let stamps: Vec<i64> = log.messages().iter().map(|m| m.timestamp).collect();
        assert_eq!(stamps, vec![1, 2, 3]);
    }

    #[test]
    fn test_user_ids_skip_system_notes() {
        let mut log = MessageLog::new();
        let m = msg_at(1);
        log.push(m.clone());
        log.push_system("merged");
        assert_eq!(log.len(), 2);
        assert_eq!(log.user_ids().len(), 1);
        assert!(log.user_ids().contains(&m.id));
    }

    #[test]
    fn test_rebased_for_remote_sender() {
        let me = UserId::generate();
        let other = UserId::generate();
        let theirs = ChatMessage::local(&other, "Other", "hi");
        assert!(!theirs.clone().rebased_for(&me).is_from_local_user);
        assert!(theirs.rebased_for(&other).is_from_local_user);
    }

    #[test]
    fn test_chat_message_wire_names() {
        let m = msg_at(5);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("senderUserId").is_some());
        assert!(json.get("isFromLocalUser").is_some());
        assert_eq!(json["timestamp"], 5);
    }

    #[test]
    fn test_memory_record_is_not_a_chat_message() {
        let m = msg_at(5);
        let json = serde_json::to_string(&m).unwrap();
        assert!(serde_json::from_str::<MemoryRecord>(&json).is_err());
    }
}

//! Divergence detection and merging for message and memory logs.
//!
//! System notes are local annotations; they never take part in a diff or a
//! merge on either side.

use std::collections::HashSet;
use uuid::Uuid;

use crate::message::{ChatMessage, MemoryRecord, MessageLog};
use crate::types::UserId;

/// Result of comparing a local log against a received one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogDiff {
    /// Ids of local user messages the remote log lacks.
    pub local_only: Vec<Uuid>,
    /// Remote user messages the local log lacks, in received order.
    pub remote_only: Vec<ChatMessage>,
}

impl LogDiff {
    /// Both sides hold messages the other lacks.
    pub fn is_conflict(&self) -> bool {
        !self.local_only.is_empty() && !self.remote_only.is_empty()
    }

    /// Nothing to merge in.
    pub fn is_up_to_date(&self) -> bool {
        self.remote_only.is_empty()
    }
}

/// Compare user messages of two logs by id.
pub fn diff_logs(local: &MessageLog, remote: &[ChatMessage]) -> LogDiff {
    let remote_ids: HashSet<Uuid> = remote.iter().filter(|m| !m.is_system).map(|m| m.id).collect();
    let local_ids = local.user_ids();

    let local_only = local
        .user_messages()
        .filter(|m| !remote_ids.contains(&m.id))
        .map(|m| m.id)
        .collect();

    let mut seen = HashSet::new();
    let remote_only = remote
        .iter()
        .filter(|m| !m.is_system && !local_ids.contains(&m.id))
        .filter(|m| seen.insert(m.id))
        .cloned()
        .collect();

    LogDiff {
        local_only,
        remote_only,
    }
}

/// Append remote-only messages and re-sort. Returns how many were added.
///
/// Duplicate ids are skipped, so applying the same input twice adds nothing
/// the second time.
pub fn merge_remote_only(log: &mut MessageLog, remote_only: Vec<ChatMessage>, local: &UserId) -> usize {
    let added = remote_only
        .into_iter()
        .filter(|m| !m.is_system)
        .map(|m| m.rebased_for(local))
        .filter(|m| log.push(m.clone()))
        .count();
    if added > 0 {
        log.sort_by_timestamp();
    }
    added
}

/// Union incoming memory records into `local` by id. Returns how many were
/// added.
pub fn merge_memories(
    local: &mut Vec<MemoryRecord>,
    incoming: impl IntoIterator<Item = MemoryRecord>,
) -> usize {
    let mut ids: HashSet<Uuid> = local.iter().map(|r| r.id).collect();
    let before = local.len();
    for record in incoming {
        if ids.insert(record.id) {
            local.push(record);
        }
    }
    local.len() - before
}

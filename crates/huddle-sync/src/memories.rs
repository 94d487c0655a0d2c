//! Memory-record sync.
//!
//! Memory records are facts that only ever grow, so sync is a plain union by
//! id: no conflict detection, no decision, no replacement.

use huddle_core::{merge_memories, MemoryRecord};

use crate::messages::SyncMessage;

/// The local set of memory records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemorySet {
    records: Vec<MemoryRecord>,
}

impl MemorySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from persisted records, dropping duplicate ids.
    pub fn from_records(records: Vec<MemoryRecord>) -> Self {
        let mut set = Self::new();
        set.on_sync(records);
        set
    }

    pub fn records(&self) -> &[MemoryRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Add a locally created record. Returns false if the id was present.
    pub fn add(&mut self, record: MemoryRecord) -> bool {
        self.on_record(record)
    }

    /// Union a peer's full set. Returns how many records were new.
    pub fn on_sync(&mut self, incoming: Vec<MemoryRecord>) -> usize {
        merge_memories(&mut self.records, incoming)
    }

    /// Union a single record pushed by a peer.
    pub fn on_record(&mut self, record: MemoryRecord) -> bool {
        merge_memories(&mut self.records, [record]) == 1
    }

    /// The `sync_memories` message announcing our entire set.
    pub fn outbound_sync(&self) -> SyncMessage {
        SyncMessage::SyncMemories {
            memories: self.records.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_by_id() {
        let shared = MemoryRecord::new("likes tea");
        let mut local = MemorySet::from_records(vec![shared.clone()]);

        let added = local.on_sync(vec![shared.clone(), MemoryRecord::new("has a cat")]);
        assert_eq!(added, 1);
        assert_eq!(local.len(), 2);

        assert_eq!(local.on_sync(vec![shared.clone()]), 0);
        assert!(!local.on_record(shared));
    }

    #[test]
    fn test_from_records_dedupes() {
        let record = MemoryRecord::new("works nights");
        let set = MemorySet::from_records(vec![record.clone(), record]);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_outbound_sync_carries_all_records() {
        let mut set = MemorySet::new();
        assert!(set.add(MemoryRecord::new("a").with_category("misc")));
        assert!(set.add(MemoryRecord::new("b")));
        match set.outbound_sync() {
            SyncMessage::SyncMemories { memories } => assert_eq!(memories, set.records()),
            other => panic!("unexpected {:?}", other),
        }
    }
}

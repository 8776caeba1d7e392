//! In-memory checkpoint store (C10)
//!
//! Generalized from the teacher's `sync::resume::ResumeManager`
//! (`HashMap`-keyed, JSON-checkpoint-interval persistence) into a concurrent
//! `(source, dest)`-keyed map with no persistence step of its own —
//! persistence is the journal's job (C11); this store is the in-memory
//! surface the scheduler and manager consult to decide whether a transfer
//! already has progress to resume from.

use crate::transfer::{SingleObjectCheckpoint, TransferKey};
use dashmap::DashMap;

/// Concurrent map from transfer key to its current chunk-level checkpoint.
pub struct CheckpointStore {
    checkpoints: DashMap<TransferKey, SingleObjectCheckpoint>,
}

impl Default for CheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self {
            checkpoints: DashMap::new(),
        }
    }

    /// Record (overwrite) the checkpoint for `key`.
    pub fn record(&self, key: TransferKey, checkpoint: SingleObjectCheckpoint) {
        self.checkpoints.insert(key, checkpoint);
    }

    /// Fetch a copy of the checkpoint for `key`, if one has been recorded.
    pub fn get(&self, key: &TransferKey) -> Option<SingleObjectCheckpoint> {
        self.checkpoints.get(key).map(|e| e.value().clone())
    }

    /// Drop the checkpoint for `key`, e.g. once the transfer finishes.
    pub fn remove(&self, key: &TransferKey) -> Option<SingleObjectCheckpoint> {
        self.checkpoints.remove(key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.checkpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkpoints.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_then_fetch_round_trips() {
        let store = CheckpointStore::new();
        let key: TransferKey = ("a".to_string(), "b".to_string());
        let mut checkpoint = SingleObjectCheckpoint::new();
        checkpoint.record_chunk(crate::transfer::single::ChunkRange { offset: 0, length: 10 }, None);
        store.record(key.clone(), checkpoint);
        let fetched = store.get(&key).unwrap();
        assert_eq!(fetched.bytes_committed, 10);
    }

    #[test]
    fn missing_key_is_none() {
        let store = CheckpointStore::new();
        assert!(store.get(&("x".to_string(), "y".to_string())).is_none());
    }
}

//! Batched delivery of activation patches to the external state store
//!
//! Transitions push `(node, active)` patches as they happen; the sink
//! coalesces them until the next tick boundary and then hands the store a
//! single batch with at most one entry per node (last write wins).

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::types::NodeId;

/// Activation patch for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationPatch {
    pub is_active: bool,
}

/// One flushed batch, keyed by node ID
pub type PatchBatch = BTreeMap<NodeId, ActivationPatch>;

/// External state store receiving batched patches
///
/// Writes are assumed idempotent; no acknowledgement is expected.
pub trait StateStore: Send + Sync {
    fn apply_patches(&self, batch: PatchBatch);
}

/// A store that discards all batches
pub struct NullStateStore;

impl StateStore for NullStateStore {
    fn apply_patches(&self, _batch: PatchBatch) {}
}

/// A store that collects batches
///
/// Useful for testing to verify what reached the store and when.
pub struct VecStateStore {
    batches: Mutex<Vec<PatchBatch>>,
}

impl VecStateStore {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected batches
    pub fn batches(&self) -> Vec<PatchBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Most recent value written for a node
    pub fn latest(&self, node_id: &str) -> Option<bool> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find_map(|b| b.get(node_id).map(|p| p.is_active))
    }

    /// Clear all collected batches
    pub fn clear(&self) {
        self.batches.lock().unwrap().clear();
    }
}

impl Default for VecStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for VecStateStore {
    fn apply_patches(&self, batch: PatchBatch) {
        self.batches.lock().unwrap().push(batch);
    }
}

/// Coalesces patches within one tick
#[derive(Debug, Default)]
pub struct BatchedSink {
    pending: HashMap<NodeId, bool>,
}

impl BatchedSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a patch; a later push for the same node replaces it
    pub fn push(&mut self, node_id: &str, active: bool) {
        self.pending.insert(node_id.to_string(), active);
    }

    /// Drop any pending patch for a node (e.g., the node left the graph)
    pub fn discard(&mut self, node_id: &str) {
        self.pending.remove(node_id);
    }

    /// Whether a flush would deliver anything
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Pending value for a node
    pub fn pending(&self, node_id: &str) -> Option<bool> {
        self.pending.get(node_id).copied()
    }

    /// Number of nodes with a pending patch
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Take the pending patches as a batch without delivering them
    pub fn take(&mut self) -> PatchBatch {
        self.pending
            .drain()
            .map(|(id, is_active)| (id, ActivationPatch { is_active }))
            .collect()
    }

    /// Deliver the pending patches to the store as one batch
    ///
    /// Returns the number of nodes in the batch. Empty ticks do not reach
    /// the store.
    pub fn flush(&mut self, store: &dyn StateStore) -> usize {
        if self.pending.is_empty() {
            return 0;
        }
        let batch = self.take();
        let len = batch.len();
        log::trace!("Flushing {} activation patches", len);
        store.apply_patches(batch);
        len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_write_wins_within_tick() {
        let store = VecStateStore::new();
        let mut sink = BatchedSink::new();

        sink.push("a", true);
        sink.push("a", false);
        assert_eq!(sink.flush(&store), 1);

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 1);
        assert_eq!(batches[0]["a"], ActivationPatch { is_active: false });
    }

    #[test]
    fn test_one_batch_per_tick() {
        let store = VecStateStore::new();
        let mut sink = BatchedSink::new();

        sink.push("a", true);
        sink.push("b", true);
        sink.push("c", false);
        assert_eq!(sink.flush(&store), 3);

        sink.push("b", false);
        assert_eq!(sink.flush(&store), 1);

        assert_eq!(store.batches().len(), 2);
        assert_eq!(store.latest("b"), Some(false));
        assert_eq!(store.latest("a"), Some(true));
        assert_eq!(store.latest("z"), None);
    }

    #[test]
    fn test_empty_flush_skips_store() {
        let store = VecStateStore::new();
        let mut sink = BatchedSink::new();
        assert_eq!(sink.flush(&store), 0);
        assert!(store.batches().is_empty());
    }

    #[test]
    fn test_discard() {
        let mut sink = BatchedSink::new();
        sink.push("a", true);
        sink.push("b", true);
        sink.discard("a");
        assert_eq!(sink.pending("a"), None);
        assert_eq!(sink.pending("b"), Some(true));
        assert_eq!(sink.pending_len(), 1);
    }

    #[test]
    fn test_batch_serializes_as_record() {
        let mut sink = BatchedSink::new();
        sink.push("n1", true);
        let json = serde_json::to_value(sink.take()).unwrap();
        assert_eq!(json, serde_json::json!({"n1": {"isActive": true}}));
        assert!(!sink.has_pending());
    }
}

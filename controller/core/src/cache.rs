use crate::{resource::ResourceKind, snapshot::Snapshot};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;

/// The per-node-identity snapshot store consulted by the discovery server.
///
/// Holds at most one snapshot per node identity; writes are last-write-wins.
/// Readers and writers contend only on the map itself, never on snapshot
/// contents.
#[derive(Debug, Default)]
pub struct SnapshotCache {
    entries: RwLock<HashMap<String, Snapshot>>,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("snapshot contains duplicate {kind} resource {name:?}")]
    DuplicateResource { kind: ResourceKind, name: String },
}

// === impl SnapshotCache ===

impl SnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a snapshot for a node identity, replacing any prior one.
    ///
    /// An inconsistent snapshot is rejected and the prior snapshot (if any)
    /// is left in place.
    pub fn set(&self, node_id: &str, snapshot: Snapshot) -> Result<(), CacheError> {
        if let Some((kind, name)) = snapshot.duplicate_name() {
            return Err(CacheError::DuplicateResource { kind, name });
        }

        self.entries.write().insert(node_id.to_string(), snapshot);
        Ok(())
    }

    pub fn get(&self, node_id: &str) -> Option<Snapshot> {
        self.entries.read().get(node_id).cloned()
    }

    pub fn clear(&self, node_id: &str) {
        self.entries.write().remove(node_id);
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}

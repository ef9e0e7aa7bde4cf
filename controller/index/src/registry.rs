use crate::store::ConfigStore;
use dashmap::DashMap;
use std::sync::Arc;

/// The identity→store map.
///
/// Owned by the process's top-level wiring and handed to whoever needs it;
/// lookups and iteration never block registration. Iteration takes a point-in-
/// time copy of the values so callers can await on stores without holding map
/// shards.
#[derive(Clone, Debug, Default)]
pub struct Registry(Arc<DashMap<String, Arc<ConfigStore>>>);

// === impl Registry ===

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, store: Arc<ConfigStore>) {
        self.0.insert(store.config().id.clone(), store);
    }

    pub fn get(&self, node_id: &str) -> Option<Arc<ConfigStore>> {
        self.0.get(node_id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, node_id: &str) -> Option<Arc<ConfigStore>> {
        self.0.remove(node_id).map(|(_, store)| store)
    }

    pub fn stores(&self) -> Vec<Arc<ConfigStore>> {
        self.0.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn node_ids(&self) -> Vec<String> {
        self.0.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

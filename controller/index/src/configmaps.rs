use crate::{
    doc::{DocumentSource, NodeConfig},
    registry::Registry,
    store::{ConfigStore, Context},
};
use anyhow::{Context as _, Result};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::task::JoinSet;
use tracing::{debug, error, info};
use xds_controller_k8s::{ConfigMap, ResourceExt};

/// Loads configuration documents from watched ConfigMaps and manages the
/// lifecycle of the per-identity configuration stores.
pub struct ConfigMapStore {
    registry: Registry,
    context: Context,

    /// All document mutation is serialized here so two concurrent updates
    /// for the same identity cannot race.
    lock: tokio::sync::Mutex<LoaderState>,

    /// Pending drain waits from deleted documents.
    drains: tokio::sync::Mutex<JoinSet<()>>,
}

#[derive(Default)]
struct LoaderState {
    /// Fingerprints of loaded documents, keyed by namespace/name. Updates
    /// that change neither data nor metadata are skipped.
    seen: ahash::AHashMap<(String, String), u64>,
}

// === impl ConfigMapStore ===

impl ConfigMapStore {
    pub fn new(registry: Registry, context: Context) -> Self {
        Self {
            registry,
            context,
            lock: Default::default(),
            drains: Default::default(),
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Whether a ConfigMap is a configuration document for this controller:
    /// either its name is explicitly listed, or it carries the configured
    /// label.
    pub fn matches(&self, cm: &ConfigMap) -> bool {
        let settings = &self.context.settings;

        if !settings.configmap_names.is_empty() {
            return cm
                .metadata
                .name
                .as_deref()
                .map(|name| settings.configmap_names.iter().any(|n| n == name))
                .unwrap_or(false);
        }

        match &settings.configmap_label {
            Some((key, value)) => cm
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(key))
                .map(|v| v == value)
                .unwrap_or(false),
            None => true,
        }
    }

    /// Loads every document in a created or updated ConfigMap.
    ///
    /// A document that fails to parse or validate rejects the whole update:
    /// the error is returned and any store previously registered for its
    /// identity keeps running unchanged.
    pub async fn apply(&self, cm: ConfigMap) -> Result<()> {
        if !self.matches(&cm) {
            return Ok(());
        }

        let name = cm.name_unchecked();
        let namespace = cm.namespace().unwrap_or_default();

        let mut state = self.lock.lock().await;

        let fingerprint = fingerprint(&cm);
        let key = (namespace.clone(), name.clone());
        if state.seen.get(&key) == Some(&fingerprint) {
            debug!(configmap = %name, "document unchanged");
            return Ok(());
        }

        for (entry, text) in cm.data.clone().unwrap_or_default() {
            if let Err(error) = self.load_document(&cm, &name, &namespace, &entry, &text).await {
                self.context.metrics.document_failures.inc();
                error!(
                    configmap = %name,
                    entry = %entry,
                    "failed to load configuration document: {error:#}",
                );
                return Err(error.context(format!("configmap {namespace}/{name} entry {entry}")));
            }
        }

        state.seen.insert(key, fingerprint);
        Ok(())
    }

    async fn load_document(
        &self,
        cm: &ConfigMap,
        cm_name: &str,
        cm_namespace: &str,
        entry: &str,
        text: &str,
    ) -> Result<()> {
        let mut config = NodeConfig::parse(entry, text)?;

        config.source = DocumentSource {
            name: cm_name.to_string(),
            namespace: cm_namespace.to_string(),
            annotations: cm.metadata.annotations.clone().unwrap_or_default(),
        };

        if config.use_version_label {
            let label = cm
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(&config.version_label_key))
                .filter(|label| !label.is_empty());
            if let Some(label) = label {
                config.version_label = Some(label.clone());
                config.id = format!("{}-{label}", config.id);
            }
        }

        for selector in &mut config.selectors {
            if selector.namespace.is_empty() {
                selector.namespace = cm_namespace.to_string();
            }
        }

        // Validation happens before the previous store is touched, so a bad
        // document leaves the running configuration intact.
        config.build_resources(self.context.settings.disable_client_validation)?;

        if let Some(existing) = self.registry.get(&config.id) {
            existing.stop();
        }

        info!(node.id = %config.id, configmap = %cm_name, "creating configuration store");
        let store = ConfigStore::new(config, self.context.clone())
            .await
            .context("constructing configuration store")?;
        self.registry.insert(store);
        self.context.metrics.documents_loaded.inc();

        Ok(())
    }

    /// Stops every store loaded from the deleted ConfigMap. Each snapshot
    /// keeps being served for the drain period before it is cleared and the
    /// identity is dropped from the registry.
    pub async fn delete(&self, name: &str, namespace: &str) {
        let mut state = self.lock.lock().await;
        state
            .seen
            .remove(&(namespace.to_string(), name.to_string()));

        for store in self.registry.stores() {
            let source = &store.config().source;
            if source.name != name || source.namespace != namespace {
                continue;
            }

            store.stop();

            let id = store.config().id.clone();
            let registry = self.registry.clone();
            let cache = self.context.cache.clone();
            let drain = self.context.settings.drain_period;
            info!(node.id = %id, ?drain, "draining");

            self.drains.lock().await.spawn(async move {
                tokio::time::sleep(drain).await;

                // The identity may have been re-registered by a newer
                // document while draining; only a still-stopped store is
                // removed.
                if registry.get(&id).map(|s| s.is_stopped()).unwrap_or(false) {
                    cache.clear(&id);
                    registry.remove(&id);
                    info!(node.id = %id, "drained and cleared");
                }
            });
        }
    }

    /// Waits for pending drains to finish.
    pub async fn shutdown(&self) {
        loop {
            let mut drains = {
                let mut guard = self.drains.lock().await;
                if guard.is_empty() {
                    return;
                }
                std::mem::take(&mut *guard)
            };
            while drains.join_next().await.is_some() {}
        }
    }
}

fn fingerprint(cm: &ConfigMap) -> u64 {
    let mut hasher = DefaultHasher::new();
    cm.data.hash(&mut hasher);
    cm.metadata.annotations.hash(&mut hasher);
    // Labels participate because the version label feeds the node identity.
    cm.metadata.labels.hash(&mut hasher);
    hasher.finish()
}

use prometheus_client::metrics::counter::Counter;
use prometheus_client::registry::Registry;

/// Counters shared across the loader and all configuration stores.
#[derive(Clone, Debug, Default)]
pub struct Metrics {
    pub snapshot_pushes: Counter,
    pub endpoint_reloads: Counter,
    pub endpoint_reload_failures: Counter,
    pub documents_loaded: Counter,
    pub document_failures: Counter,
    pub cache_divergence: Counter,
}

// === impl Metrics ===

impl Metrics {
    pub fn register(registry: &mut Registry) -> Self {
        let metrics = Self::default();

        registry.register(
            "snapshot_pushes",
            "Snapshots pushed into the cache",
            metrics.snapshot_pushes.clone(),
        );
        registry.register(
            "endpoint_reloads",
            "Endpoint recomputation passes",
            metrics.endpoint_reloads.clone(),
        );
        registry.register(
            "endpoint_reload_failures",
            "Endpoint recomputation passes aborted by an error",
            metrics.endpoint_reload_failures.clone(),
        );
        registry.register(
            "documents_loaded",
            "Configuration documents loaded successfully",
            metrics.documents_loaded.clone(),
        );
        registry.register(
            "document_failures",
            "Configuration documents rejected",
            metrics.document_failures.clone(),
        );
        registry.register(
            "cache_divergence",
            "Snapshot cache divergences detected during reconciliation",
            metrics.cache_divergence.clone(),
        );

        metrics
    }
}

use crate::{
    doc::{EndpointSelector, NodeConfig},
    endpoints::{self, EndpointGroups, Observation, DEFAULT_ZONE},
    metrics::Metrics,
    settings::Settings,
};
use anyhow::{bail, Context as _, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use xds_controller_core::{
    resource::{DataSource, Secret, SecretKind},
    Resource, Snapshot, SnapshotCache, Version,
};
use xds_controller_k8s::{pod, ClusterApi, EndpointAddress, Endpoints, Pod};
use xds_controller_trust::Authority;

/// Collaborators shared by every configuration store.
#[derive(Clone)]
pub struct Context {
    pub client: Arc<dyn ClusterApi>,
    pub cache: Arc<SnapshotCache>,
    pub authority: Arc<Authority>,
    pub settings: Arc<Settings>,
    pub metrics: Metrics,
}

/// The synchronization engine for one node identity.
///
/// Holds the parsed document, the last-pushed endpoint set, and the current
/// snapshot version. Watch callbacks and the periodic reconciliation fan-out
/// both funnel into [`ConfigStore::reload_endpoints`]; pushes always run on
/// their own task so event dispatch never blocks on the cache.
///
/// Once stopped, an instance is inert: every entry point checks the stopped
/// flag before taking the state lock.
pub struct ConfigStore {
    config: Arc<NodeConfig>,
    context: Context,

    /// Document-supplied endpoint groups, parsed once at construction.
    static_endpoints: EndpointGroups,

    stopped: AtomicBool,
    state: tokio::sync::Mutex<State>,

    /// Node name → zone. Node lookups go through the API server, so results
    /// are memoized for the lifetime of the instance. Failed lookups are not
    /// memoized, letting a transiently unreachable node recover.
    localities: parking_lot::Mutex<ahash::AHashMap<String, String>>,

    /// In-flight reload/push tasks, so shutdown can wait instead of
    /// abandoning them.
    tasks: tokio::sync::Mutex<JoinSet<()>>,
}

#[derive(Default)]
struct State {
    version: Option<Version>,
    endpoints: Option<EndpointSet>,
    secrets: Vec<Resource>,
}

struct EndpointSet {
    resources: Vec<Resource>,
    canonical: Vec<String>,
}

// === impl ConfigStore ===

impl ConfigStore {
    pub async fn new(config: NodeConfig, context: Context) -> Result<Arc<Self>> {
        let static_endpoints = match config.static_endpoints() {
            Ok(groups) => groups,
            Err(error) => {
                warn!(node.id = %config.id, %error, "ignoring invalid static endpoints");
                EndpointGroups::default()
            }
        };

        let store = Arc::new(Self {
            config: Arc::new(config),
            context,
            static_endpoints,
            stopped: AtomicBool::new(false),
            state: Default::default(),
            localities: Default::default(),
            tasks: Default::default(),
        });

        let secrets = store
            .issue_secrets()
            .context("issuing the initial secret bundle")?;
        store.state.lock().await.secrets = secrets;

        store.clone().reload_endpoints("initial load").await;

        Ok(store)
    }

    pub fn config(&self) -> &Arc<NodeConfig> {
        &self.config
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stops the store. No recomputation, push, or reconciliation has any
    /// effect afterwards; the instance lingers only until the loader's drain
    /// removes it.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            info!(node.id = %self.config.id, "stopped");
        }
    }

    /// Stops the store and waits for in-flight tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        self.quiesce().await;
    }

    /// Waits until no reload or push task is in flight.
    pub async fn quiesce(&self) {
        loop {
            let mut tasks = {
                let mut guard = self.tasks.lock().await;
                if guard.is_empty() {
                    return;
                }
                std::mem::take(&mut *guard)
            };
            while tasks.join_next().await.is_some() {}
        }
    }

    /// The last-pushed canonical endpoint array, for the status surface.
    pub async fn endpoint_summary(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .endpoints
            .as_ref()
            .map(|set| set.canonical.clone())
            .unwrap_or_default()
    }

    pub async fn current_version(&self) -> Option<Version> {
        self.state.lock().await.version.clone()
    }

    /// Schedules an endpoint recomputation on the store's task group.
    pub async fn spawn_reload(self: Arc<Self>, reason: &'static str) {
        if self.is_stopped() {
            return;
        }
        let store = self.clone();
        self.tasks
            .lock()
            .await
            .spawn(async move { store.reload_endpoints(reason).await });
    }

    /// Recomputes the endpoint set and pushes a new snapshot if it changed.
    ///
    /// The candidate set is always derived fresh: static endpoints plus the
    /// current pod/service observations. A candidate containing a non-IP
    /// address is discarded wholesale and the last-pushed set keeps serving.
    pub async fn reload_endpoints(self: Arc<Self>, reason: &'static str) {
        if self.is_stopped() {
            return;
        }

        self.context.metrics.endpoint_reloads.inc();
        debug!(node.id = %self.config.id, reason, "recomputing endpoints");

        let groups = match self.compute_endpoints().await {
            Ok(groups) => groups,
            Err(error) => {
                self.context.metrics.endpoint_reload_failures.inc();
                warn!(node.id = %self.config.id, %error, "endpoint recomputation aborted");
                return;
            }
        };

        let canonical = endpoints::canonical_strings(&groups);

        let changed = {
            let mut state = self.state.lock().await;
            let unchanged = state
                .endpoints
                .as_ref()
                .map(|current| current.canonical == canonical)
                .unwrap_or(false);
            if !unchanged {
                state.endpoints = Some(EndpointSet {
                    resources: endpoints::to_resources(&groups),
                    canonical,
                });
            }
            !unchanged
        };

        if changed {
            self.clone().spawn_push("new endpoints").await;
        }
    }

    /// Reissues the TLS secret bundle and pushes it.
    pub async fn rotate_secrets(self: Arc<Self>) -> Result<()> {
        if self.is_stopped() {
            return Ok(());
        }

        let secrets = self.issue_secrets()?;
        self.state.lock().await.secrets = secrets;
        self.clone().spawn_push("secret rotation").await;
        Ok(())
    }

    /// Periodic reconciliation: recompute endpoints, then verify the cache
    /// still holds the version this store last pushed. A missing or
    /// different version means the cache diverged underneath us (external
    /// eviction, restart); drop the local endpoint state so the next
    /// recomputation repushes unconditionally.
    pub async fn sync(self: Arc<Self>) {
        if self.is_stopped() {
            return;
        }

        self.clone().reload_endpoints("periodic resync").await;

        let diverged = {
            let mut state = self.state.lock().await;
            if state.endpoints.is_none() {
                return;
            }

            let cached = self
                .context
                .cache
                .get(&self.config.id)
                .map(|snapshot| snapshot.version().clone());

            let mismatch = match (&state.version, &cached) {
                (Some(current), cached) => cached.as_ref() != Some(current),
                (None, _) => false,
            };

            if mismatch {
                warn!(
                    node.id = %self.config.id,
                    expected = ?state.version,
                    found = ?cached,
                    "snapshot cache diverged",
                );
                state.endpoints = None;
            }
            mismatch
        };

        if diverged {
            self.context.metrics.cache_divergence.inc();
            self.clone().spawn_reload("cache resync").await;
        }
    }

    async fn spawn_push(self: Arc<Self>, reason: &'static str) {
        if self.is_stopped() {
            return;
        }
        let store = self.clone();
        self.tasks
            .lock()
            .await
            .spawn(async move { store.push(reason).await });
    }

    /// Mints a fresh version and stores the assembled snapshot.
    ///
    /// The version is only recorded once the cache accepts the snapshot, so
    /// a failed set leaves the store observably behind and a later diff or
    /// reconciliation retries the push.
    async fn push(&self, reason: &str) {
        if self.is_stopped() {
            return;
        }

        let mut state = self.state.lock().await;

        let version = loop {
            let v = Version::generate();
            if state.version.as_ref() != Some(&v) {
                break v;
            }
        };

        let endpoint_resources = state
            .endpoints
            .as_ref()
            .map(|set| set.resources.clone())
            .unwrap_or_default();

        let snapshot = Snapshot::new(
            version.clone(),
            self.config.built(),
            endpoint_resources,
            state.secrets.clone(),
        );

        match self.context.cache.set(&self.config.id, snapshot) {
            Ok(()) => {
                state.version = Some(version.clone());
                self.context.metrics.snapshot_pushes.inc();
                info!(node.id = %self.config.id, %version, reason, "pushed snapshot");
            }
            Err(error) => {
                error!(node.id = %self.config.id, %error, "failed to store snapshot");
            }
        }
    }

    async fn compute_endpoints(&self) -> Result<EndpointGroups> {
        let mut groups = self.static_endpoints.clone();

        // Every selected cluster is represented even when it currently has
        // no members, so proxies see an explicit empty assignment.
        for selector in &self.config.selectors {
            groups.entry(selector.cluster_name.clone()).or_default();
        }

        for observation in self.discover().await? {
            let (cluster, group) = observation.into_group();
            groups.entry(cluster).or_default().push(group);
        }

        if let Some((cluster, address)) = endpoints::invalid_address(&groups) {
            bail!("cluster {cluster}: address {address:?} is not an IP literal");
        }

        Ok(groups)
    }

    async fn discover(&self) -> Result<Vec<Observation>> {
        let mut observations = Vec::new();

        for selector in &self.config.selectors {
            let labels = match &selector.selector {
                Some(labels) if !labels.is_empty() => labels,
                _ => continue,
            };

            let pods = self
                .context
                .client
                .list_pods(&selector.namespace, labels)
                .await
                .context("listing pods")?;

            for pod in &pods {
                let (ip, node) = match (pod::ip(pod), pod::node_name(pod)) {
                    (Some(ip), Some(node)) if !ip.is_empty() && !node.is_empty() => (ip, node),
                    _ => continue,
                };
                if pod::is_terminating(pod) || !pod::is_ready(pod) {
                    continue;
                }

                let zone = self.zone_for(Some(node)).await;
                observations.push(Observation {
                    cluster: selector.cluster_name.clone(),
                    address: ip.to_string(),
                    port: selector.port,
                    health_check_port: selector.health_check_port,
                    priority: selector.priority,
                    zone,
                    canary: false,
                    metadata: pod_metadata(pod),
                });
            }
        }

        for selector in &self.config.selectors {
            let service = match &selector.service {
                Some(service) if !service.is_empty() => service,
                _ => continue,
            };

            match self
                .context
                .client
                .get_endpoints(&selector.namespace, service)
                .await
                .context("resolving service endpoints")?
            {
                Some(eps) => {
                    self.collect_service(selector, &eps, false, &mut observations)
                        .await
                }
                None => {
                    warn!(node.id = %self.config.id, service = %service, "service not found");
                }
            }

            let canary = format!("{service}{}", self.context.settings.canary_suffix);
            if let Some(eps) = self
                .context
                .client
                .get_endpoints(&selector.namespace, &canary)
                .await
                .context("resolving canary service endpoints")?
            {
                if canary_enabled(&eps, &self.context.settings.canary_annotation) {
                    self.collect_service(selector, &eps, true, &mut observations)
                        .await;
                } else {
                    debug!(node.id = %self.config.id, service = %canary, "canary not enabled");
                }
            }
        }

        Ok(observations)
    }

    async fn collect_service(
        &self,
        selector: &EndpointSelector,
        endpoints: &Endpoints,
        canary: bool,
        out: &mut Vec<Observation>,
    ) {
        for subset in endpoints.subsets.iter().flatten() {
            for address in subset.addresses.iter().flatten() {
                let zone = self.zone_for(address.node_name.as_deref()).await;
                let metadata = self.address_metadata(address).await;
                out.push(Observation {
                    cluster: selector.cluster_name.clone(),
                    address: address.ip.clone(),
                    port: selector.port,
                    health_check_port: selector.health_check_port,
                    priority: selector.priority,
                    zone,
                    canary,
                    metadata,
                });
            }
        }
    }

    async fn address_metadata(&self, address: &EndpointAddress) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();

        let target = address
            .target_ref
            .as_ref()
            .filter(|t| t.kind.as_deref() == Some("Pod"));
        if let Some(target) = target {
            if let (Some(namespace), Some(name)) =
                (target.namespace.as_deref(), target.name.as_deref())
            {
                match self.context.client.get_pod(namespace, name).await {
                    Ok(Some(pod)) => {
                        for (key, value) in pod.metadata.labels.iter().flatten() {
                            if key != endpoints::IGNORED_POD_LABEL {
                                metadata.insert(
                                    format!("{}{key}", endpoints::META_POD_LABEL_PREFIX),
                                    value.clone(),
                                );
                            }
                        }
                    }
                    Ok(None) => {}
                    Err(error) => {
                        warn!(node.id = %self.config.id, %error, "failed to resolve endpoint pod");
                    }
                }
                metadata.insert(endpoints::META_POD_NAME.to_string(), name.to_string());
            }
        }

        if let Some(node) = address.node_name.as_deref() {
            metadata.insert(endpoints::META_NODE_NAME.to_string(), node.to_string());
        }
        metadata.insert(endpoints::META_ENDPOINT_IP.to_string(), address.ip.clone());

        metadata
    }

    async fn zone_for(&self, node: Option<&str>) -> String {
        let node = match node {
            Some(node) if !node.is_empty() => node,
            _ => return DEFAULT_ZONE.to_string(),
        };

        if let Some(zone) = self.localities.lock().get(node) {
            return zone.clone();
        }

        let resolved = match self.context.client.get_node(node).await {
            Ok(resolved) => resolved,
            Err(error) => {
                warn!(node.id = %self.config.id, node, %error, "failed to resolve node zone");
                return DEFAULT_ZONE.to_string();
            }
        };

        let zone = resolved
            .metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(&self.context.settings.node_zone_label))
            .filter(|zone| !zone.is_empty())
            .cloned()
            .unwrap_or_else(|| DEFAULT_ZONE.to_string());

        self.localities.lock().insert(node.to_string(), zone.clone());
        zone
    }

    fn issue_secrets(&self) -> Result<Vec<Resource>> {
        let Context {
            authority,
            settings,
            ..
        } = &self.context;

        let leaf = authority
            .issue_leaf(
                std::slice::from_ref(&self.config.name),
                settings.leaf_validity,
            )
            .context("issuing serving certificate")?;

        let serving = Resource::Secret(Secret {
            name: settings.tls_secret_name.clone(),
            kind: SecretKind::TlsCertificate {
                certificate_chain: DataSource::InlineString(leaf.cert_pem),
                private_key: DataSource::InlineString(leaf.key_pem),
            },
        });

        let (mut trusted_ca, body) = if settings.disable_client_validation {
            (None, Default::default())
        } else {
            match self.config.validation_context()? {
                Some((trusted_ca, body)) => (trusted_ca, body),
                None => (None, Default::default()),
            }
        };
        if trusted_ca.is_none() {
            trusted_ca = Some(DataSource::InlineString(
                authority.root_cert_pem().to_string(),
            ));
        }

        let validation = Resource::Secret(Secret {
            name: settings.validation_secret_name.clone(),
            kind: SecretKind::ValidationContext { trusted_ca, body },
        });

        Ok(vec![serving, validation])
    }
}

impl std::fmt::Debug for ConfigStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigStore")
            .field("node_id", &self.config.id)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}

fn pod_metadata(pod: &Pod) -> BTreeMap<String, String> {
    let mut metadata = BTreeMap::new();

    for (key, value) in pod.metadata.labels.iter().flatten() {
        if key != endpoints::IGNORED_POD_LABEL {
            metadata.insert(
                format!("{}{key}", endpoints::META_POD_LABEL_PREFIX),
                value.clone(),
            );
        }
    }

    if let Some(name) = pod.metadata.name.as_deref() {
        metadata.insert(endpoints::META_POD_NAME.to_string(), name.to_string());
    }
    if let Some(ip) = pod::ip(pod) {
        metadata.insert(endpoints::META_ENDPOINT_IP.to_string(), ip.to_string());
    }
    if let Some(node) = pod::node_name(pod) {
        metadata.insert(endpoints::META_NODE_NAME.to_string(), node.to_string());
    }

    metadata
}

fn canary_enabled(endpoints: &Endpoints, annotation: &str) -> bool {
    endpoints
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(annotation))
        .map(|value| value == "true")
        .unwrap_or(false)
}

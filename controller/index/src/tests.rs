use crate::{
    doc::NodeConfig, ConfigMapStore, ConfigStore, Context, Metrics, Registry, Settings,
};
use anyhow::{anyhow, Result};
use maplit::btreemap;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use xds_controller_core::{Resource, ResourceKind, SnapshotCache};
use xds_controller_k8s::{ClusterApi, ConfigMap, EndpointAddress, Endpoints, Node, Pod};
use xds_controller_trust::Authority;

/// An in-memory cluster backing the `ClusterApi` surface.
#[derive(Clone, Default)]
struct FakeCluster {
    state: Arc<parking_lot::Mutex<FakeState>>,
}

#[derive(Default)]
struct FakeState {
    pods: Vec<Pod>,
    endpoints: BTreeMap<(String, String), Endpoints>,
    nodes: BTreeMap<String, Node>,
}

impl FakeCluster {
    fn set_pods(&self, pods: Vec<Pod>) {
        self.state.lock().pods = pods;
    }

    fn add_node(&self, name: &str, zone: &str) {
        let node = Node {
            metadata: kube::api::ObjectMeta {
                name: Some(name.to_string()),
                labels: Some(btreemap! {
                    "topology.kubernetes.io/zone".to_string() => zone.to_string(),
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        self.state.lock().nodes.insert(name.to_string(), node);
    }

    fn set_endpoints(&self, namespace: &str, name: &str, endpoints: Endpoints) {
        self.state
            .lock()
            .endpoints
            .insert((namespace.to_string(), name.to_string()), endpoints);
    }
}

#[async_trait::async_trait]
impl ClusterApi for FakeCluster {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .filter(|pod| pod.metadata.namespace.as_deref() == Some(namespace))
            .filter(|pod| {
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                selector.iter().all(|(k, v)| labels.get(k) == Some(v))
            })
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let state = self.state.lock();
        Ok(state
            .pods
            .iter()
            .find(|pod| {
                pod.metadata.namespace.as_deref() == Some(namespace)
                    && pod.metadata.name.as_deref() == Some(name)
            })
            .cloned())
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let state = self.state.lock();
        Ok(state
            .endpoints
            .get(&(namespace.to_string(), name.to_string()))
            .cloned())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let state = self.state.lock();
        state
            .nodes
            .get(name)
            .cloned()
            .ok_or_else(|| anyhow!("node {name} not found"))
    }
}

fn mk_pod(namespace: &str, name: &str, node: &str, ip: &str, ready: bool) -> Pod {
    let ready = if ready { "True" } else { "False" };
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": {"app": "svc-a", "pod-template-hash": "abc123"},
        },
        "spec": {"nodeName": node, "containers": []},
        "status": {
            "phase": "Running",
            "podIP": ip,
            "conditions": [{"type": "Ready", "status": ready}],
        },
    }))
    .unwrap()
}

fn mk_endpoints(addresses: Vec<(&str, Option<&str>)>, canary_enabled: Option<bool>) -> Endpoints {
    let mut endpoints = Endpoints {
        subsets: Some(vec![k8s_openapi::api::core::v1::EndpointSubset {
            addresses: Some(
                addresses
                    .into_iter()
                    .map(|(ip, node)| EndpointAddress {
                        ip: ip.to_string(),
                        node_name: node.map(|n| n.to_string()),
                        ..Default::default()
                    })
                    .collect(),
            ),
            ..Default::default()
        }]),
        ..Default::default()
    };
    if let Some(enabled) = canary_enabled {
        endpoints.metadata.annotations = Some(btreemap! {
            "xds-controller.io/canary-enabled".to_string() => enabled.to_string(),
        });
    }
    endpoints
}

fn mk_configmap(name: &str, namespace: &str, entries: Vec<(&str, &str)>) -> ConfigMap {
    ConfigMap {
        metadata: kube::api::ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(btreemap! {
                "app".to_string() => "xds-controller".to_string(),
            }),
            ..Default::default()
        },
        data: Some(
            entries
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        ),
        ..Default::default()
    }
}

struct Harness {
    cluster: FakeCluster,
    cache: Arc<SnapshotCache>,
    context: Context,
}

impl Harness {
    fn new(settings: Settings) -> Self {
        let cluster = FakeCluster::default();
        let cache = Arc::new(SnapshotCache::new());
        let context = Context {
            client: Arc::new(cluster.clone()),
            cache: cache.clone(),
            authority: Arc::new(Authority::generate("xds-controller-test").unwrap()),
            settings: Arc::new(settings),
            metrics: Metrics::default(),
        };
        Self {
            cluster,
            cache,
            context,
        }
    }

    async fn store(&self, doc: &str) -> Arc<ConfigStore> {
        let mut config = NodeConfig::parse("svc-a", doc).unwrap();
        for selector in &mut config.selectors {
            if selector.namespace.is_empty() {
                selector.namespace = "ns1".to_string();
            }
        }
        config
            .build_resources(self.context.settings.disable_client_validation)
            .unwrap();
        let store = ConfigStore::new(config, self.context.clone()).await.unwrap();
        store.quiesce().await;
        store
    }
}

const POD_SELECTOR_DOC: &str = "\
id: svc-a
kubernetes:
- cluster_name: svc-a
  port: 8080
  selector:
    app: svc-a
clusters:
- name: svc-a
";

#[tokio::test]
async fn empty_selection_pushes_one_empty_cluster() {
    let harness = Harness::new(Settings::default());
    let store = harness.store(POD_SELECTOR_DOC).await;

    // Zero matching pods still produce a snapshot with an explicit, empty
    // assignment for the selected cluster.
    let snapshot = harness.cache.get("svc-a").expect("initial snapshot");
    let assignments = snapshot.resources(ResourceKind::LoadAssignment);
    assert_eq!(assignments.len(), 1);
    match &assignments[0] {
        Resource::LoadAssignment(cla) => {
            assert_eq!(cla.cluster_name, "svc-a");
            assert!(cla.endpoints.is_empty());
        }
        other => panic!("unexpected resource {other:?}"),
    }

    assert!(store.endpoint_summary().await.is_empty());
    assert!(store.current_version().await.is_some());
}

#[tokio::test]
async fn ready_pod_becomes_an_endpoint_with_zone_and_metadata() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    let store = harness.store(POD_SELECTOR_DOC).await;

    assert_eq!(
        store.endpoint_summary().await,
        vec!["svc-a|us-east-1a|0|10.0.0.5|8080|0".to_string()],
    );

    let snapshot = harness.cache.get("svc-a").unwrap();
    match &snapshot.resources(ResourceKind::LoadAssignment)[0] {
        Resource::LoadAssignment(cla) => {
            let member = &cla.endpoints[0].lb_endpoints[0];
            let meta = serde_json::to_value(&member.metadata).unwrap();
            assert_eq!(meta["k8s.pod.name"], "svc-a-0");
            assert_eq!(meta["k8s.node.name"], "node-a");
            assert_eq!(meta["k8s.pod.labels.app"], "svc-a");
            assert_eq!(meta["stage"], "main");
            // Replica-template churn labels never reach proxies.
            assert!(meta.get("k8s.pod.labels.pod-template-hash").is_none());
        }
        other => panic!("unexpected resource {other:?}"),
    }
}

#[tokio::test]
async fn recomputation_is_idempotent() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();
    let pushes = harness.context.metrics.snapshot_pushes.get();

    // No cluster change: same canonical array, no new push.
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;

    assert_eq!(store.current_version().await.unwrap(), version);
    assert_eq!(harness.context.metrics.snapshot_pushes.get(), pushes);
}

#[tokio::test]
async fn discovery_order_does_not_trigger_pushes() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness.cluster.add_node("node-b", "us-east-1b");
    let pod0 = mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true);
    let pod1 = mk_pod("ns1", "svc-a-1", "node-b", "10.0.0.6", true);

    harness.cluster.set_pods(vec![pod0.clone(), pod1.clone()]);
    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();

    // The same pods in a different discovery order canonicalize identically.
    harness.cluster.set_pods(vec![pod1, pod0]);
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;

    assert_eq!(store.current_version().await.unwrap(), version);
}

#[tokio::test]
async fn readiness_transitions_push_distinct_versions() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");

    // Zero ready pods.
    let store = harness.store(POD_SELECTOR_DOC).await;
    let v1 = store.current_version().await.unwrap();
    assert!(store.endpoint_summary().await.is_empty());

    // One ready pod appears.
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;
    let v2 = store.current_version().await.unwrap();
    assert_eq!(store.endpoint_summary().await.len(), 1);

    // The pod stops passing readiness.
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", false)]);
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;
    let v3 = store.current_version().await.unwrap();
    assert!(store.endpoint_summary().await.is_empty());

    assert_ne!(v1, v2);
    assert_ne!(v2, v3);
    assert_ne!(v1, v3);
}

#[tokio::test]
async fn invalid_address_aborts_the_pass() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();
    let summary = store.endpoint_summary().await;

    // A pod with a hostname instead of an IP poisons the candidate set; the
    // pass is discarded and the previous snapshot keeps serving.
    harness.cluster.set_pods(vec![
        mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true),
        mk_pod("ns1", "svc-a-1", "node-a", "bad.example.com", true),
    ]);
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;

    assert_eq!(store.current_version().await.unwrap(), version);
    assert_eq!(store.endpoint_summary().await, summary);
    assert_eq!(
        harness.cache.get("svc-a").unwrap().version(),
        &version,
    );
    assert_eq!(harness.context.metrics.endpoint_reload_failures.get(), 1);
}

#[tokio::test]
async fn reconciliation_heals_a_cleared_cache() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();

    // Someone clears the cache behind the store's back.
    harness.cache.clear("svc-a");

    store.clone().sync().await;
    store.quiesce().await;

    let healed = harness.cache.get("svc-a").expect("snapshot repushed");
    assert_ne!(healed.version(), &version);
    assert_eq!(harness.context.metrics.cache_divergence.get(), 1);

    // A matching cache is left alone.
    let settled = store.current_version().await.unwrap();
    store.clone().sync().await;
    store.quiesce().await;
    assert_eq!(store.current_version().await.unwrap(), settled);
}

#[tokio::test]
async fn stopped_store_is_inert() {
    let harness = Harness::new(Settings::default());
    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();

    store.stop();

    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    store.clone().reload_endpoints("test").await;
    store.clone().sync().await;
    store.clone().rotate_secrets().await.unwrap();
    store.quiesce().await;

    assert_eq!(store.current_version().await.unwrap(), version);
    assert_eq!(harness.cache.get("svc-a").unwrap().version(), &version);
}

#[tokio::test]
async fn secret_rotation_pushes_fresh_material() {
    let harness = Harness::new(Settings::default());
    let store = harness.store(POD_SELECTOR_DOC).await;
    let version = store.current_version().await.unwrap();

    let serving_secret = |snapshot: &xds_controller_core::Snapshot| {
        snapshot
            .resources(ResourceKind::Secret)
            .iter()
            .find(|r| r.name() == "xds_controller_default")
            .map(|r| serde_json::to_string(r).unwrap())
            .expect("serving secret present")
    };
    let before = serving_secret(&harness.cache.get("svc-a").unwrap());

    store.clone().rotate_secrets().await.unwrap();
    store.quiesce().await;

    let snapshot = harness.cache.get("svc-a").unwrap();
    assert_ne!(snapshot.version(), &version);
    assert_ne!(serving_secret(&snapshot), before);
}

#[tokio::test]
async fn service_selector_discovers_canary_siblings() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_endpoints("ns1", "svc-b", mk_endpoints(vec![("10.0.1.1", Some("node-a"))], None));
    harness.cluster.set_endpoints(
        "ns1",
        "svc-b-canary",
        mk_endpoints(vec![("10.0.1.2", Some("node-a"))], Some(true)),
    );

    let store = harness
        .store(
            "\
id: svc-a
kubernetes:
- cluster_name: svc-b
  port: 9090
  service: svc-b
",
        )
        .await;

    assert_eq!(
        store.endpoint_summary().await,
        vec![
            "svc-b|us-east-1a|0|10.0.1.1|9090|0".to_string(),
            "svc-b|us-east-1a|0|10.0.1.2|9090|0".to_string(),
        ],
    );

    let snapshot = harness.cache.get("svc-a").unwrap();
    match &snapshot.resources(ResourceKind::LoadAssignment)[0] {
        Resource::LoadAssignment(cla) => {
            let stages: Vec<String> = cla
                .endpoints
                .iter()
                .map(|group| {
                    let meta = serde_json::to_value(&group.lb_endpoints[0].metadata).unwrap();
                    format!("{}:{}", group.lb_endpoints[0].address, meta["stage"])
                })
                .collect();
            assert!(stages.contains(&"10.0.1.1:\"main\"".to_string()));
            assert!(stages.contains(&"10.0.1.2:\"canary\"".to_string()));
        }
        other => panic!("unexpected resource {other:?}"),
    }
}

#[tokio::test]
async fn disabled_canary_siblings_are_skipped() {
    let harness = Harness::new(Settings::default());
    harness
        .cluster
        .set_endpoints("ns1", "svc-b", mk_endpoints(vec![("10.0.1.1", None)], None));
    harness.cluster.set_endpoints(
        "ns1",
        "svc-b-canary",
        mk_endpoints(vec![("10.0.1.2", None)], Some(false)),
    );

    let store = harness
        .store(
            "\
id: svc-a
kubernetes:
- cluster_name: svc-b
  port: 9090
  service: svc-b
",
        )
        .await;

    assert_eq!(
        store.endpoint_summary().await,
        vec!["svc-b|unknown|0|10.0.1.1|9090|0".to_string()],
    );
}

#[tokio::test]
async fn unresolvable_nodes_degrade_to_the_default_zone() {
    let harness = Harness::new(Settings::default());
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-gone", "10.0.0.5", true)]);

    let store = harness.store(POD_SELECTOR_DOC).await;
    assert_eq!(
        store.endpoint_summary().await,
        vec!["svc-a|unknown|0|10.0.0.5|8080|0".to_string()],
    );

    // The failed lookup is not memoized: once the node is resolvable the
    // zone recovers.
    harness.cluster.add_node("node-gone", "us-east-1c");
    store.clone().reload_endpoints("test").await;
    store.quiesce().await;
    assert_eq!(
        store.endpoint_summary().await,
        vec!["svc-a|us-east-1c|0|10.0.0.5|8080|0".to_string()],
    );
}

#[tokio::test]
async fn static_endpoints_merge_with_discovered_members() {
    let harness = Harness::new(Settings::default());
    harness.cluster.add_node("node-a", "us-east-1a");
    harness
        .cluster
        .set_pods(vec![mk_pod("ns1", "svc-a-0", "node-a", "10.0.0.5", true)]);

    let store = harness
        .store(
            "\
id: svc-a
kubernetes:
- cluster_name: svc-a
  port: 8080
  selector:
    app: svc-a
endpoints:
- cluster_name: external
  endpoints:
  - locality: {zone: dc1}
    lb_endpoints:
    - {address: 192.0.2.7, port: 443}
",
        )
        .await;

    assert_eq!(
        store.endpoint_summary().await,
        vec![
            "external|dc1|0|192.0.2.7|443|0".to_string(),
            "svc-a|us-east-1a|0|10.0.0.5|8080|0".to_string(),
        ],
    );
}

// === loader lifecycle ===

fn loader(harness: &Harness) -> Arc<ConfigMapStore> {
    Arc::new(ConfigMapStore::new(
        Registry::new(),
        harness.context.clone(),
    ))
}

#[tokio::test]
async fn loader_creates_a_store_per_document_entry() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    let cm = mk_configmap(
        "envoy-config",
        "ns1",
        vec![
            ("svc-a", "kubernetes:\n- cluster_name: svc-a\n  port: 8080\n  selector: {app: svc-a}\n"),
            ("svc-b", "clusters:\n- name: svc-b\n"),
        ],
    );
    loader.apply(cm).await.unwrap();

    let mut ids = loader.registry().node_ids();
    ids.sort();
    assert_eq!(ids, vec!["svc-a".to_string(), "svc-b".to_string()]);

    // Selector namespaces default from the document's namespace.
    let store = loader.registry().get("svc-a").unwrap();
    assert_eq!(store.config().selectors[0].namespace, "ns1");

    for store in loader.registry().stores() {
        store.quiesce().await;
    }
    assert!(harness.cache.get("svc-a").is_some());
    assert!(harness.cache.get("svc-b").is_some());
}

#[tokio::test]
async fn loader_suffixes_identity_with_the_version_label() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    let mut cm = mk_configmap(
        "envoy-config",
        "ns1",
        vec![("svc-a", "use_version_label: true\n")],
    );
    cm.metadata
        .labels
        .as_mut()
        .unwrap()
        .insert("version".to_string(), "v2".to_string());

    loader.apply(cm).await.unwrap();

    assert_eq!(loader.registry().node_ids(), vec!["svc-a-v2".to_string()]);
    let store = loader.registry().get("svc-a-v2").unwrap();
    assert_eq!(store.config().version_label.as_deref(), Some("v2"));
}

#[tokio::test]
async fn invalid_document_leaves_prior_store_running() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    loader
        .apply(mk_configmap(
            "envoy-config",
            "ns1",
            vec![("svc-a", "clusters:\n- name: svc-a\n")],
        ))
        .await
        .unwrap();
    let store = loader.registry().get("svc-a").unwrap();

    // An unnamed cluster rejects the update wholesale.
    let mut broken = mk_configmap(
        "envoy-config",
        "ns1",
        vec![("svc-a", "clusters:\n- connect_timeout: 1s\n")],
    );
    broken
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert("rev".to_string(), "2".to_string());
    assert!(loader.apply(broken).await.is_err());

    assert!(!store.is_stopped());
    assert!(Arc::ptr_eq(&loader.registry().get("svc-a").unwrap(), &store));
    assert_eq!(harness.context.metrics.document_failures.get(), 1);
}

#[tokio::test]
async fn replacing_a_document_stops_the_prior_store() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    loader
        .apply(mk_configmap(
            "envoy-config",
            "ns1",
            vec![("svc-a", "clusters:\n- name: svc-a\n")],
        ))
        .await
        .unwrap();
    let first = loader.registry().get("svc-a").unwrap();

    let mut updated = mk_configmap(
        "envoy-config",
        "ns1",
        vec![("svc-a", "clusters:\n- name: svc-a-v2\n")],
    );
    updated
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert("rev".to_string(), "2".to_string());
    loader.apply(updated).await.unwrap();

    assert!(first.is_stopped());
    let replacement = loader.registry().get("svc-a").unwrap();
    assert!(!replacement.is_stopped());
    assert!(!Arc::ptr_eq(&replacement, &first));
}

#[tokio::test]
async fn unchanged_documents_are_not_reloaded() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    let cm = mk_configmap("envoy-config", "ns1", vec![("svc-a", "clusters: []\n")]);
    loader.apply(cm.clone()).await.unwrap();
    let store = loader.registry().get("svc-a").unwrap();

    loader.apply(cm).await.unwrap();

    assert!(!store.is_stopped());
    assert!(Arc::ptr_eq(&loader.registry().get("svc-a").unwrap(), &store));
    assert_eq!(harness.context.metrics.documents_loaded.get(), 1);
}

#[tokio::test(start_paused = true)]
async fn deleted_documents_drain_before_the_cache_is_cleared() {
    let drain = Duration::from_secs(5);
    let harness = Harness::new(Settings {
        drain_period: drain,
        ..Settings::default()
    });
    let loader = loader(&harness);

    loader
        .apply(mk_configmap(
            "envoy-config",
            "ns1",
            vec![("svc-a", "clusters: []\n")],
        ))
        .await
        .unwrap();
    let store = loader.registry().get("svc-a").unwrap();
    store.quiesce().await;
    assert!(harness.cache.get("svc-a").is_some());

    loader.delete("envoy-config", "ns1").await;

    // Stopped immediately, but the snapshot keeps serving...
    assert!(store.is_stopped());
    assert!(harness.cache.get("svc-a").is_some());
    assert!(loader.registry().get("svc-a").is_some());

    // ...until the drain period elapses.
    tokio::time::advance(drain + Duration::from_millis(10)).await;
    loader.shutdown().await;

    assert!(harness.cache.get("svc-a").is_none());
    assert!(loader.registry().get("svc-a").is_none());
}

#[tokio::test]
async fn unrelated_configmaps_are_ignored() {
    let harness = Harness::new(Settings::default());
    let loader = loader(&harness);

    let mut cm = mk_configmap("other", "ns1", vec![("svc-a", "clusters: []\n")]);
    cm.metadata.labels = Some(btreemap! {
        "app".to_string() => "something-else".to_string(),
    });
    loader.apply(cm).await.unwrap();

    assert!(loader.registry().is_empty());
}

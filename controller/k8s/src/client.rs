use anyhow::Result;
use k8s_openapi::api::core::v1::{Endpoints, Node, Pod};
use kube::api::{Api, ListParams};
use std::collections::BTreeMap;

/// Point lookups against the cluster, as consumed by the synchronization
/// engine.
///
/// The engine never walks watch events for data; it re-reads the objects it
/// cares about on every recomputation. Keeping this surface behind a trait
/// lets tests drive the engine from an in-memory cluster.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>>;

    async fn get_node(&self, name: &str) -> Result<Node>;
}

/// The production implementation over a kube client.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: kube::Client,
}

// === impl KubeClusterApi ===

impl KubeClusterApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Vec<Pod>> {
        let params = ListParams::default().labels(&crate::label_selector(selector));
        let pods = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .list(&params)
            .await?;
        Ok(pods.items)
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        let pod = Api::<Pod>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?;
        Ok(pod)
    }

    async fn get_endpoints(&self, namespace: &str, name: &str) -> Result<Option<Endpoints>> {
        let endpoints = Api::<Endpoints>::namespaced(self.client.clone(), namespace)
            .get_opt(name)
            .await?;
        Ok(endpoints)
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        let node = Api::<Node>::all(self.client.clone()).get(name).await?;
        Ok(node)
    }
}

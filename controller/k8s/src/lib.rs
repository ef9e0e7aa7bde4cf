#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod client;
pub mod pod;

pub use self::client::{ClusterApi, KubeClusterApi};
pub use k8s_openapi::api::core::v1::{
    ConfigMap, EndpointAddress, Endpoints, Node, Pod, PodSpec, PodStatus,
};
pub use kube::api::{ObjectMeta, ResourceExt};
pub use kube::runtime::watcher::Event;

/// Renders a label map as a Kubernetes label-selector expression.
pub fn label_selector(labels: &std::collections::BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join(",")
}

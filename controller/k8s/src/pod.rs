//! Pod inspection helpers shared by the endpoint discovery path.

use k8s_openapi::api::core::v1::Pod;

/// A pod only backs an endpoint while it is running and passing readiness.
pub fn is_ready(pod: &Pod) -> bool {
    let status = match pod.status.as_ref() {
        Some(status) => status,
        None => return false,
    };

    if status.phase.as_deref() != Some("Running") {
        return false;
    }

    status
        .conditions
        .iter()
        .flatten()
        .any(|c| c.type_ == "Ready" && c.status == "True")
}

pub fn ip(pod: &Pod) -> Option<&str> {
    pod.status.as_ref()?.pod_ip.as_deref()
}

pub fn node_name(pod: &Pod) -> Option<&str> {
    pod.spec.as_ref()?.node_name.as_deref()
}

pub fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

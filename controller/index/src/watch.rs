//! Watch dispatch loops.
//!
//! One loop per watched resource type consumes the runtime's event stream
//! and drives the loader or the store fleet. Pod and endpoints events only
//! ever *trigger* recomputation — the engines re-read cluster state through
//! point lookups — so event payloads are not interpreted here.

use crate::{configmaps::ConfigMapStore, registry::Registry};
use futures::prelude::*;
use kube::runtime::watcher::Event;
use std::sync::Arc;
use tracing::debug;
use xds_controller_k8s::{ConfigMap, Endpoints, Pod, ResourceExt};

/// Fans pod changes out to every running store.
pub async fn pods(registry: Registry, events: impl Stream<Item = Event<Pod>>) {
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        match &event {
            Event::Applied(pod) => debug!(pod = %pod.name_any(), "pod updated"),
            Event::Deleted(pod) => debug!(pod = %pod.name_any(), "pod deleted"),
            Event::Restarted(pods) => debug!(pods = pods.len(), "pod watch restarted"),
        }
        fan_out(&registry, "pod event").await;
    }

    // The runtime restarts failed watches internally; a terminated stream
    // means that contract was violated.
    panic!("pod watch stream terminated");
}

/// Fans service endpoint changes out to every running store.
pub async fn endpoints(registry: Registry, events: impl Stream<Item = Event<Endpoints>>) {
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        if let Event::Applied(eps) = &event {
            debug!(endpoints = %eps.name_any(), "endpoints updated");
        }
        fan_out(&registry, "endpoints event").await;
    }

    panic!("endpoints watch stream terminated");
}

/// Feeds ConfigMap changes into the document loader.
pub async fn config_maps(
    loader: Arc<ConfigMapStore>,
    events: impl Stream<Item = Event<ConfigMap>>,
) {
    tokio::pin!(events);
    while let Some(event) = events.next().await {
        match event {
            Event::Applied(cm) => {
                // Load failures are logged with full context by the loader;
                // the watch keeps running.
                let _ = loader.apply(cm).await;
            }
            Event::Deleted(cm) => {
                if loader.matches(&cm) {
                    let name = cm.name_unchecked();
                    let namespace = cm.namespace().unwrap_or_default();
                    loader.delete(&name, &namespace).await;
                }
            }
            Event::Restarted(cms) => {
                for cm in cms {
                    let _ = loader.apply(cm).await;
                }
            }
        }
    }

    panic!("configmap watch stream terminated");
}

async fn fan_out(registry: &Registry, reason: &'static str) {
    for store in registry.stores() {
        store.spawn_reload(reason).await;
    }
}

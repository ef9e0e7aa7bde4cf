//! Endpoint observation shaping.
//!
//! Discovery emits one [`Observation`] per live backend; observations are
//! grouped per target cluster into locality groups and flattened into a
//! sorted canonical form used for change detection. The canonical form makes
//! the push decision independent of map and discovery ordering.

use ahash::AHashMap as HashMap;
use std::collections::BTreeMap;
use xds_controller_core::{
    resource::{
        ClusterLoadAssignment, LbEndpoint, Locality, LocalityEndpoints, MetadataValue,
    },
    Resource,
};

pub(crate) const DEFAULT_ZONE: &str = "unknown";

pub(crate) const META_POD_NAME: &str = "k8s.pod.name";
pub(crate) const META_POD_LABEL_PREFIX: &str = "k8s.pod.labels.";
pub(crate) const META_ENDPOINT_IP: &str = "k8s.endpoint.ip";
pub(crate) const META_NODE_NAME: &str = "k8s.node.name";

/// Replica-template churn makes this label useless as endpoint metadata.
pub(crate) const IGNORED_POD_LABEL: &str = "pod-template-hash";

/// Per-cluster locality groups, as pushed to proxies.
pub(crate) type EndpointGroups = HashMap<String, Vec<LocalityEndpoints>>;

/// One live backend, as observed during a recomputation pass.
#[derive(Clone, Debug)]
pub(crate) struct Observation {
    pub cluster: String,
    pub address: String,
    pub port: u32,
    pub health_check_port: Option<u32>,
    pub priority: u32,
    pub zone: String,
    pub canary: bool,
    pub metadata: BTreeMap<String, String>,
}

// === impl Observation ===

impl Observation {
    pub fn into_group(self) -> (String, LocalityEndpoints) {
        let mut metadata: BTreeMap<String, MetadataValue> = BTreeMap::new();
        metadata.insert("canary".to_string(), MetadataValue::Bool(self.canary));
        metadata.insert(
            "stage".to_string(),
            MetadataValue::String(if self.canary { "canary" } else { "main" }.to_string()),
        );
        for (key, value) in self.metadata {
            metadata.insert(key, MetadataValue::String(value));
        }

        let group = LocalityEndpoints {
            locality: Locality { zone: self.zone },
            priority: self.priority,
            lb_endpoints: vec![LbEndpoint {
                address: self.address,
                port: self.port,
                health_check_port: self.health_check_port,
                metadata,
            }],
        };

        (self.cluster, group)
    }
}

/// Flattens groups into sorted `cluster|zone|priority|address|port|health`
/// strings for cheap equality comparison.
pub(crate) fn canonical_strings(groups: &EndpointGroups) -> Vec<String> {
    let mut out = Vec::new();
    for (cluster, localities) in groups {
        for locality in localities {
            for ep in &locality.lb_endpoints {
                out.push(format!(
                    "{}|{}|{}|{}|{}|{}",
                    cluster,
                    locality.locality.zone,
                    locality.priority,
                    ep.address,
                    ep.port,
                    ep.health_check_port.unwrap_or(0),
                ));
            }
        }
    }
    out.sort();
    out
}

/// Returns the first member address that is not a strict IP literal.
pub(crate) fn invalid_address(groups: &EndpointGroups) -> Option<(&str, &str)> {
    for (cluster, localities) in groups {
        for locality in localities {
            for ep in &locality.lb_endpoints {
                if ep.address.parse::<std::net::IpAddr>().is_err() {
                    return Some((cluster.as_str(), ep.address.as_str()));
                }
            }
        }
    }
    None
}

/// One load-assignment resource per target cluster, in name order.
pub(crate) fn to_resources(groups: &EndpointGroups) -> Vec<Resource> {
    let mut clusters: Vec<&String> = groups.keys().collect();
    clusters.sort();

    clusters
        .into_iter()
        .map(|cluster| {
            Resource::LoadAssignment(ClusterLoadAssignment {
                cluster_name: cluster.clone(),
                endpoints: groups[cluster].clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn observation(cluster: &str, address: &str, zone: &str) -> Observation {
        Observation {
            cluster: cluster.to_string(),
            address: address.to_string(),
            port: 8080,
            health_check_port: None,
            priority: 0,
            zone: zone.to_string(),
            canary: false,
            metadata: BTreeMap::new(),
        }
    }

    fn groups_of(observations: Vec<Observation>) -> EndpointGroups {
        let mut groups = EndpointGroups::default();
        for obs in observations {
            let (cluster, group) = obs.into_group();
            groups.entry(cluster).or_default().push(group);
        }
        groups
    }

    #[test]
    fn canonical_form_is_discovery_order_independent() {
        let a = groups_of(vec![
            observation("web", "10.0.0.1", "z1"),
            observation("web", "10.0.0.2", "z2"),
            observation("api", "10.0.1.1", "z1"),
        ]);
        let b = groups_of(vec![
            observation("api", "10.0.1.1", "z1"),
            observation("web", "10.0.0.2", "z2"),
            observation("web", "10.0.0.1", "z1"),
        ]);

        assert_eq!(canonical_strings(&a), canonical_strings(&b));
        assert_eq!(
            canonical_strings(&a),
            vec![
                "api|z1|0|10.0.1.1|8080|0".to_string(),
                "web|z1|0|10.0.0.1|8080|0".to_string(),
                "web|z2|0|10.0.0.2|8080|0".to_string(),
            ],
        );
    }

    #[test]
    fn detects_non_ip_addresses() {
        let groups = groups_of(vec![observation("web", "backend.example.com", "z1")]);
        let (cluster, address) = invalid_address(&groups).unwrap();
        assert_eq!(cluster, "web");
        assert_eq!(address, "backend.example.com");

        let ok = groups_of(vec![
            observation("web", "10.0.0.1", "z1"),
            observation("web", "2001:db8::1", "z1"),
        ]);
        assert!(invalid_address(&ok).is_none());
    }

    #[test]
    fn observation_metadata_carries_stage() {
        let mut obs = observation("web", "10.0.0.1", "z1");
        obs.canary = true;
        obs.metadata
            .insert(META_POD_NAME.to_string(), "web-0".to_string());

        let (_, group) = obs.into_group();
        let metadata = &group.lb_endpoints[0].metadata;
        assert_eq!(metadata.get("canary"), Some(&MetadataValue::Bool(true)));
        assert_eq!(
            metadata.get("stage"),
            Some(&MetadataValue::String("canary".to_string())),
        );
        assert_eq!(
            metadata.get(META_POD_NAME),
            Some(&MetadataValue::String("web-0".to_string())),
        );
    }

    #[test]
    fn resources_are_in_cluster_name_order() {
        let groups = groups_of(vec![
            observation("web", "10.0.0.1", "z1"),
            observation("api", "10.0.1.1", "z1"),
        ]);
        let resources = to_resources(&groups);
        let names: Vec<&str> = resources.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["api", "web"]);
    }
}

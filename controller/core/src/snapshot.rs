use crate::{
    resource::{Resource, ResourceKind},
    version::Version,
};
use ahash::AHashMap as HashMap;
use std::sync::Arc;

/// The static resources built from one configuration document.
#[derive(Clone, Debug, Default)]
pub struct ResourceSet {
    pub clusters: Vec<Resource>,
    pub routes: Vec<Resource>,
    pub listeners: Vec<Resource>,
    pub secrets: Vec<Resource>,
}

/// An immutable, versioned bundle of resources for one node identity.
///
/// Cheap to clone; the per-kind lists are shared.
#[derive(Clone, Debug)]
pub struct Snapshot {
    version: Version,
    resources: HashMap<ResourceKind, Arc<[Resource]>>,
}

// === impl Snapshot ===

impl Snapshot {
    /// Assembles the full bundle: document-supplied statics, the derived
    /// endpoint resources, and the controller-issued TLS secrets appended to
    /// the document's own.
    pub fn new(
        version: Version,
        statics: &ResourceSet,
        endpoints: Vec<Resource>,
        issued_secrets: Vec<Resource>,
    ) -> Self {
        let mut secrets = statics.secrets.clone();
        secrets.extend(issued_secrets);

        let mut resources = HashMap::with_capacity(ResourceKind::ALL.len());
        resources.insert(ResourceKind::Cluster, statics.clusters.clone().into());
        resources.insert(ResourceKind::RouteConfiguration, statics.routes.clone().into());
        resources.insert(ResourceKind::Listener, statics.listeners.clone().into());
        resources.insert(ResourceKind::Secret, secrets.into());
        resources.insert(ResourceKind::LoadAssignment, endpoints.into());

        Self { version, resources }
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    pub fn resources(&self, kind: ResourceKind) -> &[Resource] {
        self.resources.get(&kind).map(|r| &**r).unwrap_or(&[])
    }

    /// Returns the name of a resource that appears twice within one kind, if
    /// any. A bundle with duplicate names is ambiguous to proxies and must
    /// not be served.
    pub(crate) fn duplicate_name(&self) -> Option<(ResourceKind, String)> {
        for kind in ResourceKind::ALL {
            let mut seen = ahash::AHashSet::new();
            for resource in self.resources(kind) {
                if !seen.insert(resource.name()) {
                    return Some((kind, resource.name().to_string()));
                }
            }
        }
        None
    }
}

//! Configuration documents.
//!
//! Each entry of a watched ConfigMap is one document describing the full
//! desired configuration for a node identity. Documents are parsed into
//! [`NodeConfig`] values, validated eagerly, and replaced wholesale whenever
//! the source changes.

use ahash::AHashMap as HashMap;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::warn;
use xds_controller_core::{
    resource::{self, DataSource, LocalityEndpoints},
    Resource, ResourceKind, ResourceSet,
};

/// Annotation prefix for per-cluster route weight overrides. The suffix is
/// the weighted cluster's name; the value is the desired weight.
pub const ROUTE_WEIGHT_ANNOTATION: &str = "xds-controller.io/route-weight-";

/// Where a document came from.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentSource {
    pub name: String,
    pub namespace: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Declares how live endpoints are discovered for one target cluster:
/// either a pod label selector or a service name.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EndpointSelector {
    pub cluster_name: String,

    /// Defaulted to the source document's namespace when unset.
    #[serde(default)]
    pub namespace: String,

    pub port: u32,

    #[serde(default)]
    pub health_check_port: Option<u32>,

    #[serde(default)]
    pub priority: u32,

    #[serde(default)]
    pub selector: Option<BTreeMap<String, String>>,

    #[serde(default)]
    pub service: Option<String>,
}

/// A parsed configuration document for one node identity.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub id: String,

    /// Used as the common name of issued serving certificates.
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub use_version_label: bool,

    #[serde(default = "default_version_label_key")]
    pub version_label_key: String,

    #[serde(skip_deserializing)]
    pub version_label: Option<String>,

    #[serde(default, rename = "kubernetes")]
    pub selectors: Vec<EndpointSelector>,

    #[serde(default)]
    pub endpoints: Vec<Value>,

    #[serde(default)]
    pub clusters: Vec<Value>,

    #[serde(default)]
    pub routes: Vec<Value>,

    #[serde(default)]
    pub listeners: Vec<Value>,

    #[serde(default)]
    pub secrets: Vec<Value>,

    /// Optional certificate-validation context override.
    #[serde(default)]
    pub validation: Option<Value>,

    #[serde(skip_deserializing)]
    pub source: DocumentSource,

    #[serde(skip)]
    built: ResourceSet,
}

fn default_version_label_key() -> String {
    "version".to_string()
}

// === impl NodeConfig ===

impl NodeConfig {
    /// Expands placeholders and deserializes a document. Missing `id`/`name`
    /// fields default from the document's data key.
    pub fn parse(node_id: &str, text: &str) -> Result<Self> {
        let expanded = expand_placeholders(text);
        let mut config: NodeConfig =
            serde_yaml::from_str(&expanded).context("deserializing configuration document")?;

        if config.id.is_empty() {
            config.id = node_id.to_string();
        }
        if config.name.is_empty() {
            config.name = config.id.clone();
        }

        Ok(config)
    }

    /// Converts every static resource list into its typed form, failing the
    /// whole document on the first invalid entry.
    ///
    /// Route weight overrides from the source annotations are applied here,
    /// and listener client-certificate requirements are dropped when the
    /// controller runs without client validation.
    pub fn build_resources(&mut self, strip_client_certs: bool) -> Result<()> {
        let clusters = Resource::from_values(ResourceKind::Cluster, self.clusters.clone())?;
        let mut routes =
            Resource::from_values(ResourceKind::RouteConfiguration, self.routes.clone())?;
        let mut listeners = Resource::from_values(ResourceKind::Listener, self.listeners.clone())?;
        let secrets = Resource::from_values(ResourceKind::Secret, self.secrets.clone())?;

        let overrides = self.route_weight_overrides()?;
        if !overrides.is_empty() {
            apply_weight_overrides(&mut routes, &overrides);
        }

        if strip_client_certs {
            resource::strip_client_certificate_requirements(&mut listeners);
        }

        // A malformed validation context should reject the document here, not
        // surface later when the secret bundle is rebuilt.
        self.validation_context()?;

        self.built = ResourceSet {
            clusters,
            routes,
            listeners,
            secrets,
        };

        Ok(())
    }

    pub fn built(&self) -> &ResourceSet {
        &self.built
    }

    /// Parses the document's static endpoint resources into per-cluster
    /// locality groups. Called once per store instance.
    pub fn static_endpoints(&self) -> Result<HashMap<String, Vec<LocalityEndpoints>>> {
        let resources = Resource::from_values(ResourceKind::LoadAssignment, self.endpoints.clone())?;

        let mut groups: HashMap<String, Vec<LocalityEndpoints>> = HashMap::new();
        for converted in resources {
            if let Resource::LoadAssignment(cla) = converted {
                groups.entry(cla.cluster_name).or_default().extend(cla.endpoints);
            }
        }

        Ok(groups)
    }

    /// The document's certificate-validation context, split into the trusted
    /// CA (if supplied) and the remaining context body.
    pub(crate) fn validation_context(
        &self,
    ) -> Result<Option<(Option<DataSource>, serde_json::Map<String, Value>)>> {
        let value = match &self.validation {
            Some(value) => value,
            None => return Ok(None),
        };

        let mut body: serde_json::Map<String, Value> = serde_json::from_value(value.clone())
            .context("validation context must be a mapping")?;
        let trusted_ca = body
            .remove("trusted_ca")
            .map(serde_json::from_value)
            .transpose()
            .context("invalid trusted_ca in validation context")?;

        Ok(Some((trusted_ca, body)))
    }

    fn route_weight_overrides(&self) -> Result<BTreeMap<String, u32>> {
        let mut overrides = BTreeMap::new();
        for (key, value) in &self.source.annotations {
            if let Some(cluster) = key.strip_prefix(ROUTE_WEIGHT_ANNOTATION) {
                let weight = value
                    .parse::<u32>()
                    .with_context(|| format!("invalid route weight for cluster {cluster:?}"))?;
                overrides.insert(cluster.to_string(), weight);
            }
        }
        Ok(overrides)
    }
}

fn apply_weight_overrides(routes: &mut [Resource], overrides: &BTreeMap<String, u32>) {
    for route in routes.iter_mut() {
        let rc = match route {
            Resource::Route(rc) => rc,
            _ => continue,
        };
        for vhost in rc.virtual_hosts.iter_mut() {
            for entry in vhost.routes.iter_mut() {
                let weighted = match entry.route.as_mut().and_then(|a| a.weighted_clusters.as_mut())
                {
                    Some(w) => w,
                    None => continue,
                };
                for cluster in weighted.clusters.iter_mut() {
                    if let Some(&weight) = overrides.get(&cluster.name) {
                        if cluster.weight != weight {
                            warn!(
                                cluster = %cluster.name,
                                from = cluster.weight,
                                to = weight,
                                "overriding route weight",
                            );
                            cluster.weight = weight;
                        }
                    }
                }
            }
        }
    }
}

/// Expands `${NAME}` environment references in document text. Unknown names
/// are left verbatim so parse errors point at the original text.
fn expand_placeholders(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let end = after.find('}');
        let name = end.map(|end| &after[..end]).filter(|name| {
            !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        });

        match (end, name.and_then(|name| std::env::var(name).ok())) {
            (Some(end), Some(value)) => {
                out.push_str(&value);
                rest = &after[end + 1..];
            }
            (Some(end), None) => {
                out.push_str(&rest[start..start + 2 + end + 1]);
                rest = &after[end + 1..];
            }
            (None, _) => {
                out.push_str("${");
                rest = after;
            }
        }
    }

    out.push_str(rest);
    out
}

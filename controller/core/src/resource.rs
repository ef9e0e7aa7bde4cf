//! Typed renditions of the discovery-protocol resource kinds.
//!
//! Configuration documents carry these as YAML. Fields the controller must
//! reach into (names, listener transport sockets, route weights, endpoint
//! members) are modeled; everything else is preserved verbatim through a
//! flattened map so operator-supplied bodies round-trip unmodified.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// The transport socket name that carries a downstream TLS context.
pub const TLS_TRANSPORT_SOCKET: &str = "envoy.transport_sockets.tls";

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Cluster,
    RouteConfiguration,
    Listener,
    Secret,
    LoadAssignment,
}

impl ResourceKind {
    pub const ALL: [Self; 5] = [
        Self::Cluster,
        Self::RouteConfiguration,
        Self::Listener,
        Self::Secret,
        Self::LoadAssignment,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            Self::Cluster => "type.googleapis.com/envoy.config.cluster.v3.Cluster",
            Self::RouteConfiguration => {
                "type.googleapis.com/envoy.config.route.v3.RouteConfiguration"
            }
            Self::Listener => "type.googleapis.com/envoy.config.listener.v3.Listener",
            Self::Secret => {
                "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret"
            }
            Self::LoadAssignment => {
                "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment"
            }
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Cluster => "cluster",
            Self::RouteConfiguration => "route",
            Self::Listener => "listener",
            Self::Secret => "secret",
            Self::LoadAssignment => "endpoint",
        };
        name.fmt(f)
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = ResourceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cluster" => Ok(Self::Cluster),
            "route" => Ok(Self::RouteConfiguration),
            "listener" => Ok(Self::Listener),
            "secret" => Ok(Self::Secret),
            "endpoint" => Ok(Self::LoadAssignment),
            _ => Err(ResourceError::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("unknown resource kind {0:?}")]
    UnknownKind(String),

    #[error("invalid {kind} resource: {source}")]
    Convert {
        kind: ResourceKind,
        #[source]
        source: serde_json::Error,
    },

    #[error("{kind} resource has no name")]
    Unnamed { kind: ResourceKind },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteConfiguration {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub virtual_hosts: Vec<VirtualHost>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VirtualHost {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteEntry>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<RouteAction>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RouteAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weighted_clusters: Option<WeightedClusters>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedClusters {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub clusters: Vec<ClusterWeight>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterWeight {
    pub name: String,

    #[serde(default)]
    pub weight: u32,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Listener {
    pub name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filter_chains: Vec<FilterChain>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterChain {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transport_socket: Option<TransportSocket>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransportSocket {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typed_config: Option<TlsContext>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TlsContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub require_client_certificate: Option<bool>,

    #[serde(flatten)]
    pub body: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub name: String,

    #[serde(flatten)]
    pub kind: SecretKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SecretKind {
    #[serde(rename = "tls_certificate")]
    TlsCertificate {
        certificate_chain: DataSource,
        private_key: DataSource,
    },

    #[serde(rename = "validation_context")]
    ValidationContext {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        trusted_ca: Option<DataSource>,

        #[serde(flatten)]
        body: Map<String, Value>,
    },
}

/// Certificate or key material, inline or by file reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum DataSource {
    #[serde(rename = "inline_string")]
    InlineString(String),

    #[serde(rename = "inline_bytes")]
    InlineBytes(String),

    #[serde(rename = "filename")]
    Filename(String),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterLoadAssignment {
    pub cluster_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub endpoints: Vec<LocalityEndpoints>,
}

/// One group of members sharing a failure domain and priority.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalityEndpoints {
    #[serde(default)]
    pub locality: Locality,

    #[serde(default)]
    pub priority: u32,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub lb_endpoints: Vec<LbEndpoint>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Locality {
    #[serde(default)]
    pub zone: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LbEndpoint {
    pub address: String,

    pub port: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_port: Option<u32>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    String(String),
}

/// A discovery-protocol resource of any kind.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Resource {
    Cluster(Cluster),
    Route(RouteConfiguration),
    Listener(Listener),
    Secret(Secret),
    LoadAssignment(ClusterLoadAssignment),
}

// === impl Resource ===

impl Resource {
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Cluster(_) => ResourceKind::Cluster,
            Self::Route(_) => ResourceKind::RouteConfiguration,
            Self::Listener(_) => ResourceKind::Listener,
            Self::Secret(_) => ResourceKind::Secret,
            Self::LoadAssignment(_) => ResourceKind::LoadAssignment,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Cluster(c) => &c.name,
            Self::Route(r) => &r.name,
            Self::Listener(l) => &l.name,
            Self::Secret(s) => &s.name,
            Self::LoadAssignment(cla) => &cla.cluster_name,
        }
    }

    /// Converts an untyped document value into the typed resource for `kind`.
    ///
    /// Each kind has exactly one conversion; an empty name is rejected here
    /// so a malformed document fails at load time rather than at push time.
    pub fn from_value(kind: ResourceKind, value: Value) -> Result<Self, ResourceError> {
        fn convert<T: serde::de::DeserializeOwned>(
            kind: ResourceKind,
            value: Value,
        ) -> Result<T, ResourceError> {
            serde_json::from_value(value).map_err(|source| ResourceError::Convert { kind, source })
        }

        let resource = match kind {
            ResourceKind::Cluster => Self::Cluster(convert(kind, value)?),
            ResourceKind::RouteConfiguration => Self::Route(convert(kind, value)?),
            ResourceKind::Listener => Self::Listener(convert(kind, value)?),
            ResourceKind::Secret => Self::Secret(convert(kind, value)?),
            ResourceKind::LoadAssignment => Self::LoadAssignment(convert(kind, value)?),
        };

        if resource.name().is_empty() {
            return Err(ResourceError::Unnamed { kind });
        }

        Ok(resource)
    }

    /// Converts a whole document list, failing on the first invalid entry.
    pub fn from_values(
        kind: ResourceKind,
        values: Vec<Value>,
    ) -> Result<Vec<Self>, ResourceError> {
        values
            .into_iter()
            .map(|v| Self::from_value(kind, v))
            .collect()
    }
}

/// Clears the mandatory-client-certificate requirement from every TLS
/// transport socket. Used when the controller serves proxies that cannot
/// present client certificates (development mode).
pub fn strip_client_certificate_requirements(resources: &mut [Resource]) {
    for resource in resources.iter_mut() {
        let listener = match resource {
            Resource::Listener(l) => l,
            _ => continue,
        };
        for chain in listener.filter_chains.iter_mut() {
            let socket = match chain.transport_socket.as_mut() {
                Some(s) if s.name == TLS_TRANSPORT_SOCKET => s,
                _ => continue,
            };
            if let Some(tls) = socket.typed_config.as_mut() {
                if tls.require_client_certificate.is_some() {
                    tls.require_client_certificate = Some(false);
                }
            }
        }
    }
}

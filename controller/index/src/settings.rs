use std::time::Duration;

/// Process-wide knobs shared by the document loader and every configuration
/// store.
#[derive(Clone, Debug)]
pub struct Settings {
    /// Node label carrying the failure-domain zone.
    pub node_zone_label: String,

    /// Name under which the controller-issued serving certificate is
    /// published to proxies.
    pub tls_secret_name: String,

    /// Name under which the certificate-validation context is published.
    pub validation_secret_name: String,

    /// Drops mandatory client-certificate checks from listeners and skips
    /// document validation contexts. Development only.
    pub disable_client_validation: bool,

    /// How long a stopped node's snapshot keeps being served before it is
    /// cleared from the cache.
    pub drain_period: Duration,

    /// Validity of issued serving certificates.
    pub leaf_validity: Duration,

    /// Name suffix identifying a service's canary sibling.
    pub canary_suffix: String,

    /// Annotation that must be `"true"` on a canary service's endpoints for
    /// them to be discovered.
    pub canary_annotation: String,

    /// Exact configuration document names to load. When empty, documents are
    /// selected by `configmap_label` instead.
    pub configmap_names: Vec<String>,

    /// `key=value` label selecting configuration documents.
    pub configmap_label: Option<(String, String)>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            node_zone_label: "topology.kubernetes.io/zone".to_string(),
            tls_secret_name: "xds_controller_default".to_string(),
            validation_secret_name: "validation".to_string(),
            disable_client_validation: false,
            drain_period: Duration::from_secs(5),
            leaf_validity: xds_controller_trust::LEAF_VALIDITY,
            canary_suffix: "-canary".to_string(),
            canary_annotation: "xds-controller.io/canary-enabled".to_string(),
            configmap_names: Vec::new(),
            configmap_label: Some(("app".to_string(), "xds-controller".to_string())),
        }
    }
}

use crate::admin;
use anyhow::{bail, Context as _, Result};
use clap::Parser;
use futures::prelude::*;
use kube::runtime::watcher;
use prometheus_client::registry::Registry as PromRegistry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time;
use tracing::{info_span, warn, Instrument};
use xds_controller_core::SnapshotCache;
use xds_controller_index::{watch, ConfigMapStore, Context, Metrics, Registry, Settings};
use xds_controller_k8s::{ConfigMap, Endpoints, KubeClusterApi, Pod};
use xds_controller_trust::Authority;

#[derive(Debug, Parser)]
#[clap(name = "xds-controller", about = "Derives per-node proxy configuration from cluster state")]
pub struct Args {
    #[clap(
        long,
        default_value = "xds_controller=info,warn",
        env = "XDS_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Address of the read-only status server.
    #[clap(long, default_value = "0.0.0.0:8090")]
    status_addr: SocketAddr,

    /// Label (key=value) selecting configuration ConfigMaps.
    #[clap(long, default_value = "app=xds-controller")]
    configmap_label: String,

    /// Comma-separated ConfigMap names to load instead of the label
    /// selector.
    #[clap(long)]
    configmap_names: Option<String>,

    /// Restricts watches to one namespace; all namespaces when unset.
    #[clap(long, env = "XDS_CONTROLLER_NAMESPACE")]
    namespace: Option<String>,

    /// Node label carrying the locality zone.
    #[clap(long, default_value = "topology.kubernetes.io/zone")]
    node_zone_label: String,

    /// Seconds a deleted node's snapshot keeps being served.
    #[clap(long, default_value = "5")]
    drain_timeout_secs: u64,

    /// Seconds between endpoint reconciliation sweeps.
    #[clap(long, default_value = "60")]
    reconcile_period_secs: u64,

    /// Seconds between serving-certificate rotations.
    #[clap(long, default_value = "3600")]
    cert_rotation_period_secs: u64,

    /// Name under which the serving certificate is published to proxies.
    #[clap(long, default_value = "xds_controller_default")]
    tls_secret_name: String,

    /// Drops client-certificate requirements from listeners. Development
    /// only.
    #[clap(long)]
    no_client_validation: bool,

    /// Root certificate PEM path; a root is generated when unset.
    #[clap(long)]
    ca_cert: Option<PathBuf>,

    /// Root key PEM path; must be set together with --ca-cert.
    #[clap(long)]
    ca_key: Option<PathBuf>,
}

// === impl Args ===

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            admin,
            status_addr,
            configmap_label,
            configmap_names,
            namespace,
            node_zone_label,
            drain_timeout_secs,
            reconcile_period_secs,
            cert_rotation_period_secs,
            tls_secret_name,
            no_client_validation,
            ca_cert,
            ca_key,
        } = self;

        let authority = Arc::new(match (ca_cert, ca_key) {
            (Some(cert), Some(key)) => Authority::from_pem_files(cert, key)?,
            (None, None) => Authority::generate("xds-controller")?,
            _ => bail!("--ca-cert and --ca-key must be set together"),
        });

        let configmap_names: Vec<String> = configmap_names
            .as_deref()
            .map(|names| {
                names
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let settings = Arc::new(Settings {
            node_zone_label,
            tls_secret_name,
            disable_client_validation: no_client_validation,
            drain_period: Duration::from_secs(drain_timeout_secs),
            configmap_names,
            configmap_label: Some(parse_label(&configmap_label)?),
            ..Settings::default()
        });

        let mut prom = <PromRegistry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("xds_controller"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let cache = Arc::new(SnapshotCache::new());
        let registry = Registry::new();
        let context = Context {
            client: Arc::new(KubeClusterApi::new(runtime.client())),
            cache: cache.clone(),
            authority: authority.clone(),
            settings: settings.clone(),
            metrics,
        };
        let loader = Arc::new(ConfigMapStore::new(registry.clone(), context.clone()));

        // One dispatch loop per watched resource type.
        let cm_watch = if settings.configmap_names.is_empty() {
            watcher::Config::default().labels(&configmap_label)
        } else {
            watcher::Config::default()
        };
        let config_maps = match namespace.as_deref() {
            Some(ns) => runtime
                .watch_namespaced::<ConfigMap>(ns.to_owned(), cm_watch)
                .boxed(),
            None => runtime.watch_all::<ConfigMap>(cm_watch).boxed(),
        };
        tokio::spawn(
            watch::config_maps(loader.clone(), config_maps).instrument(info_span!("configmaps")),
        );

        let pods = match namespace.as_deref() {
            Some(ns) => runtime
                .watch_namespaced::<Pod>(ns.to_owned(), watcher::Config::default())
                .boxed(),
            None => runtime.watch_all::<Pod>(watcher::Config::default()).boxed(),
        };
        tokio::spawn(watch::pods(registry.clone(), pods).instrument(info_span!("pods")));

        let endpoints = match namespace.as_deref() {
            Some(ns) => runtime
                .watch_namespaced::<Endpoints>(ns.to_owned(), watcher::Config::default())
                .boxed(),
            None => runtime
                .watch_all::<Endpoints>(watcher::Config::default())
                .boxed(),
        };
        tokio::spawn(
            watch::endpoints(registry.clone(), endpoints).instrument(info_span!("endpoints")),
        );

        // Periodic fleet tasks: endpoint reconciliation and certificate
        // rotation.
        tokio::spawn(
            reconcile(registry.clone(), Duration::from_secs(reconcile_period_secs))
                .instrument(info_span!("reconcile")),
        );
        tokio::spawn(
            rotate_certificates(
                registry.clone(),
                Duration::from_secs(cert_rotation_period_secs),
            )
            .instrument(info_span!("rotate")),
        );

        // Read-only status surface.
        let handles = admin::Handles {
            registry,
            cache,
            authority,
            client: context.client.clone(),
            node_zone_label: settings.node_zone_label.clone(),
            leaf_validity: settings.leaf_validity,
        };
        tokio::spawn(admin::serve(status_addr, handles).instrument(info_span!("status")));

        if runtime.run().await.is_err() {
            bail!("aborted");
        }

        // Let pending drains settle so deleted identities are cleared.
        loader.shutdown().await;

        Ok(())
    }
}

async fn reconcile(registry: Registry, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        for store in registry.stores() {
            store.sync().await;
        }
    }
}

async fn rotate_certificates(registry: Registry, period: Duration) {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        for store in registry.stores() {
            let node_id = store.config().id.clone();
            if let Err(error) = store.rotate_secrets().await {
                warn!(node.id = %node_id, %error, "failed to rotate certificates");
            }
        }
    }
}

fn parse_label(label: &str) -> Result<(String, String)> {
    label
        .split_once('=')
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .with_context(|| format!("invalid label selector {label:?}; expected key=value"))
}

#[cfg(test)]
mod tests {
    use super::parse_label;

    #[test]
    fn labels_must_be_key_value() {
        assert_eq!(
            parse_label("app=xds-controller").unwrap(),
            ("app".to_string(), "xds-controller".to_string()),
        );
        assert!(parse_label("app").is_err());
    }
}

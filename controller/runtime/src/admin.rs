//! The read-only status server.
//!
//! Serves operator-facing dumps of the controller's state. Nothing here
//! mutates core state; every handler reads through the same accessors the
//! engines expose.

use futures::future;
use hyper::{Body, Method, Request, Response, StatusCode};
use serde::Serialize;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};
use xds_controller_core::SnapshotCache;
use xds_controller_index::Registry;
use xds_controller_k8s::{pod, ClusterApi};
use xds_controller_trust::Authority;

#[derive(Clone)]
pub(crate) struct Handles {
    pub registry: Registry,
    pub cache: Arc<SnapshotCache>,
    pub authority: Arc<Authority>,
    pub client: Arc<dyn ClusterApi>,
    pub node_zone_label: String,
    pub leaf_validity: Duration,
}

#[instrument(skip_all, fields(port = %addr.port()))]
pub(crate) async fn serve(addr: SocketAddr, handles: Handles) -> Result<(), hyper::Error> {
    let server =
        hyper::server::Server::bind(&addr).serve(hyper::service::make_service_fn(move |_conn| {
            let handles = handles.clone();
            future::ok::<_, hyper::Error>(hyper::service::service_fn(
                move |req: Request<Body>| {
                    let handles = handles.clone();
                    async move { Ok::<_, hyper::Error>(handle(handles, req).await) }
                },
            ))
        }));
    let addr = server.local_addr();
    info!(%addr, "status server listening");
    server.await
}

async fn handle(handles: Handles, req: Request<Body>) -> Response<Body> {
    match *req.method() {
        Method::GET | Method::HEAD => {}
        _ => {
            return Response::builder()
                .status(StatusCode::METHOD_NOT_ALLOWED)
                .body(Body::default())
                .unwrap()
        }
    }

    match req.uri().path() {
        "/ready" => text(StatusCode::OK, "ready\n"),
        "/config_dump" => config_dump(&handles),
        "/config_endpoints" => config_endpoints(&handles).await,
        "/status" => status(&handles).await,
        "/zone" => zone(&handles, req.uri().query()).await,
        "/api/cert" => cert(&handles, req.uri().query()),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::default())
            .unwrap(),
    }
}

fn config_dump(handles: &Handles) -> Response<Body> {
    let configs: Vec<_> = handles
        .registry
        .stores()
        .iter()
        .map(|store| store.config().as_ref().clone())
        .collect();
    json(&configs)
}

async fn config_endpoints(handles: &Handles) -> Response<Body> {
    let mut out = BTreeMap::new();
    for store in handles.registry.stores() {
        out.insert(store.config().id.clone(), store.endpoint_summary().await);
    }
    json(&out)
}

#[derive(Serialize)]
struct NodeStatus {
    node_id: String,
    stopped: bool,
    version: Option<String>,
    cached_version: Option<String>,
}

async fn status(handles: &Handles) -> Response<Body> {
    let mut nodes = Vec::new();
    for store in handles.registry.stores() {
        let node_id = store.config().id.clone();
        let cached_version = handles
            .cache
            .get(&node_id)
            .map(|snapshot| snapshot.version().to_string());
        nodes.push(NodeStatus {
            cached_version,
            stopped: store.is_stopped(),
            version: store.current_version().await.map(|v| v.to_string()),
            node_id,
        });
    }
    nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let mut cache_ids = handles.cache.node_ids();
    cache_ids.sort();

    json(&serde_json::json!({ "nodes": nodes, "cache": cache_ids }))
}

/// Resolves the locality zone a pod would be assigned, for debugging
/// endpoint placement.
async fn zone(handles: &Handles, query: Option<&str>) -> Response<Body> {
    let params = parse_query(query);
    let (namespace, name) = match (params.get("namespace"), params.get("pod")) {
        (Some(namespace), Some(pod)) => (namespace, pod),
        _ => return text(StatusCode::BAD_REQUEST, "namespace and pod are required\n"),
    };

    let node = match handles.client.get_pod(namespace, name).await {
        Ok(Some(found)) => pod::node_name(&found).map(str::to_string),
        Ok(None) => return text(StatusCode::NOT_FOUND, "pod not found\n"),
        Err(_) => None,
    };

    let zone = match node {
        Some(node) => match handles.client.get_node(&node).await {
            Ok(resolved) => resolved
                .metadata
                .labels
                .as_ref()
                .and_then(|labels| labels.get(&handles.node_zone_label))
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
            Err(_) => "unknown".to_string(),
        },
        None => "unknown".to_string(),
    };

    json(&serde_json::json!({ "zone": zone }))
}

fn cert(handles: &Handles, query: Option<&str>) -> Response<Body> {
    let params = parse_query(query);
    let name = match params.get("name") {
        Some(name) if !name.is_empty() => name.clone(),
        _ => return text(StatusCode::BAD_REQUEST, "name is required\n"),
    };

    match handles.authority.issue_leaf(&[name], handles.leaf_validity) {
        Ok(leaf) => json(&serde_json::json!({
            "certificate": leaf.cert_pem,
            "key": leaf.key_pem,
        })),
        Err(_) => text(StatusCode::INTERNAL_SERVER_ERROR, "issuance failed\n"),
    }
}

fn parse_query(query: Option<&str>) -> BTreeMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_vec_pretty(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(body.into())
            .unwrap(),
        Err(_) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::default())
            .unwrap(),
    }
}

fn text(status: StatusCode, body: &'static str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(hyper::header::CONTENT_TYPE, "text/plain")
        .body(body.into())
        .unwrap()
}

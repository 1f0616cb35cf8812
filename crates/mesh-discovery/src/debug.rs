//! Debug HTTP endpoints.
//!
//! Unauthenticated introspection of the server's in-memory state, bound
//! to a dedicated admin port:
//!
//! - `/debug/adsz` — connected streams; `push=1` triggers a global push,
//!   `proxyID=<id>` restricts the output
//! - `/debug/edsz` — endpoint assignments; `push=1` triggers a push
//! - `/debug/cdsz` — per-connection cluster watches
//! - `/debug/registryz`, `/debug/endpointz`, `/debug/configz` — the
//!   model caches

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::future;
use hyper::{Body, Request, Response, StatusCode};
use serde::Serialize;
use tracing::info;

use mesh_model::LabelsCollection;

use crate::connection::LastPush;
use crate::server::DiscoveryServer;

/// Serve the debug endpoints until the process exits.
pub async fn serve(addr: SocketAddr, server: Arc<DiscoveryServer>) -> Result<(), hyper::Error> {
    let make_service = hyper::service::make_service_fn(move |_conn| {
        let server = Arc::clone(&server);
        future::ok::<_, hyper::Error>(hyper::service::service_fn(
            move |req: Request<Body>| {
                let server = Arc::clone(&server);
                async move { Ok::<_, hyper::Error>(handle(&server, &req)) }
            },
        ))
    });

    let bound = hyper::server::Server::bind(&addr).serve(make_service);
    info!(%addr, "debug HTTP server listening");
    bound.await
}

fn handle(server: &Arc<DiscoveryServer>, req: &Request<Body>) -> Response<Body> {
    let query = parse_query(req.uri().query());
    match req.uri().path() {
        "/debug/adsz" => adsz(server, &query),
        "/debug/edsz" => edsz(server, &query),
        "/debug/cdsz" => cdsz(server),
        "/debug/registryz" => registryz(server),
        "/debug/endpointz" => endpointz(server),
        "/debug/configz" => configz(server),
        _ => Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::default())
            .unwrap_or_default(),
    }
}

fn parse_query(query: Option<&str>) -> HashMap<String, String> {
    query
        .unwrap_or_default()
        .split('&')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn json<T: Serialize>(value: &T) -> Response<Body> {
    match serde_json::to_string_pretty(value) {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap_or_default(),
        Err(err) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(err.to_string()))
            .unwrap_or_default(),
    }
}

#[derive(Serialize)]
struct ConnectionView {
    con_id: String,
    peer_addr: String,
    node: String,
    connected_seconds: u64,
    cds_watch: bool,
    lds_watch: bool,
    routes: Vec<String>,
    clusters: Vec<String>,
    last_pushed: HashMap<&'static str, LastPush>,
}

fn connection_views(server: &DiscoveryServer, proxy_filter: Option<&str>) -> Vec<ConnectionView> {
    server
        .connection_snapshot()
        .into_iter()
        .filter_map(|con| {
            let node = con
                .proxy()
                .map(|p| p.service_node())
                .unwrap_or_default();
            if let Some(filter) = proxy_filter {
                let matches = con.proxy().map(|p| p.id == filter).unwrap_or(false);
                if !matches {
                    return None;
                }
            }
            let watched = con.watched.lock().expect("watched lock poisoned");
            Some(ConnectionView {
                con_id: con.con_id().to_string(),
                peer_addr: con.peer_addr.clone(),
                node,
                connected_seconds: con.connected_at.elapsed().as_secs(),
                cds_watch: watched.cds_watch,
                lds_watch: watched.lds_watch,
                routes: watched.routes.clone(),
                clusters: watched.clusters.clone(),
                last_pushed: watched.last_pushed.clone(),
            })
        })
        .collect()
}

fn adsz(server: &Arc<DiscoveryServer>, query: &HashMap<String, String>) -> Response<Body> {
    if query.get("push").map(String::as_str) == Some("1") {
        server.push_all();
    }
    let views = connection_views(server, query.get("proxyID").map(String::as_str));
    json(&views)
}

#[derive(Serialize)]
struct EdsView {
    cluster: String,
    watchers: Vec<String>,
    endpoints: Vec<String>,
}

fn edsz(server: &Arc<DiscoveryServer>, query: &HashMap<String, String>) -> Response<Body> {
    if query.get("push").map(String::as_str) == Some("1") {
        server.push_all();
    }
    let views: Vec<EdsView> = server
        .eds
        .snapshot()
        .into_iter()
        .map(|(cluster, entry)| {
            let mut watchers: Vec<String> = entry.watchers.into_iter().collect();
            watchers.sort();
            let endpoints = entry
                .load_assignment
                .endpoints
                .iter()
                .flat_map(|locality| &locality.lb_endpoints)
                .filter_map(|e| e.address.as_ref())
                .filter_map(|a| a.socket_address.as_ref())
                .map(|s| format!("{}:{}", s.address, s.port_value))
                .collect();
            EdsView {
                cluster,
                watchers,
                endpoints,
            }
        })
        .collect();
    json(&views)
}

#[derive(Serialize)]
struct CdsView {
    con_id: String,
    node: String,
    clusters: Vec<String>,
}

fn cdsz(server: &Arc<DiscoveryServer>) -> Response<Body> {
    let views: Vec<CdsView> = server
        .connection_snapshot()
        .into_iter()
        .map(|con| {
            let node = con
                .proxy()
                .map(|p| p.service_node())
                .unwrap_or_default();
            let watched = con.watched.lock().expect("watched lock poisoned");
            CdsView {
                con_id: con.con_id().to_string(),
                node,
                clusters: watched.clusters.clone(),
            }
        })
        .collect();
    json(&views)
}

fn registryz(server: &Arc<DiscoveryServer>) -> Response<Body> {
    json(&*server.service_snapshot())
}

fn endpointz(server: &Arc<DiscoveryServer>) -> Response<Body> {
    let mut out = Vec::new();
    for service in server.service_snapshot().iter() {
        let ports: Vec<String> = service.ports.iter().map(|p| p.name.clone()).collect();
        if let Ok(instances) = server.environment().discovery.instances(
            &service.hostname,
            &ports,
            &LabelsCollection::new(),
        ) {
            out.extend(instances);
        }
    }
    json(&out)
}

fn configz(server: &Arc<DiscoveryServer>) -> Response<Body> {
    json(&server.config_snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_parsing() {
        let q = parse_query(Some("push=1&proxyID=reviews-v1"));
        assert_eq!(q.get("push").map(String::as_str), Some("1"));
        assert_eq!(q.get("proxyID").map(String::as_str), Some("reviews-v1"));
        assert!(parse_query(None).is_empty());
    }
}

//! Public HTTP multiplexer.
//!
//! The public port is served straight off the TCP socket: one task per
//! connection reads requests with the shared codec, answers the control
//! surface (status, admin, allocation, landing) inline, and hands
//! everything else to the proxies. Owning the raw socket is what makes
//! the upgrade path possible — a WebSocket request needs the connection
//! itself, not a response object.

use std::net::SocketAddr;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, trace};

use portway_proto::http::{read_request, write_response, HttpError, Request, Response};
use portway_proto::{ids, TunnelStatus};

use crate::admin;
use crate::proxy;
use crate::registry::{AllocateError, TunnelRegistry};

/// Accept loop for the public HTTP port.
pub struct PublicServer {
    listener: TcpListener,
    registry: Arc<TunnelRegistry>,
    landing_url: String,
}

impl PublicServer {
    pub fn new(listener: TcpListener, registry: Arc<TunnelRegistry>, landing_url: String) -> Self {
        Self {
            listener,
            registry,
            landing_url,
        }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub async fn run(self) -> std::io::Result<()> {
        let landing_url = Arc::new(self.landing_url);
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    trace!(%peer_addr, "public connection");
                    let registry = self.registry.clone();
                    let landing_url = landing_url.clone();
                    tokio::spawn(async move {
                        handle_connection(stream, peer_addr, registry, &landing_url).await;
                    });
                }
                Err(e) => {
                    error!("public listener accept error: {e}");
                }
            }
        }
    }
}

/// Where one request is routed.
#[derive(Debug, PartialEq)]
enum Route {
    ServerStats,
    Admin,
    TunnelStats(String),
    Allocate(String),
    InvalidId,
    Landing,
    NotFound,
    Proxy { id: String, target: String },
}

/// Serve one public connection until it closes or is hijacked.
async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    registry: Arc<TunnelRegistry>,
    landing_url: &str,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    loop {
        let req = match read_request(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => return,
            Err(e) => {
                debug!(%peer_addr, "public request read failed: {e}");
                return;
            }
        };
        let close_after = req.wants_close();
        trace!(%peer_addr, method = %req.method, target = %req.target, "public request");

        let response = match classify(&req, registry.domain()) {
            Route::ServerStats => json_response(&registry.stats()),
            Route::Admin => admin::handle(&req, registry.auth(), peer_addr),
            Route::TunnelStats(id) => match registry.lookup(&id) {
                Some(tunnel) => json_response::<TunnelStatus>(&tunnel.status()),
                None => not_found(),
            },
            Route::Allocate(id) => allocate(&req, &id, peer_addr, &registry),
            Route::InvalidId => Response::text(
                403,
                "Forbidden",
                "Invalid tunnel id. Ids must be 4 to 63 lowercase alphanumeric or hyphen characters.",
            ),
            Route::Landing => Response::new(302, "Found").with_header("Location", landing_url),
            Route::NotFound => not_found(),
            Route::Proxy { id, target } => {
                let Some(tunnel) = registry.lookup(&id) else {
                    if respond(&mut writer, &not_found()).await.is_err() {
                        return;
                    }
                    if close_after {
                        return;
                    }
                    continue;
                };

                let mut req = req;
                req.target = target;

                if req.is_websocket_upgrade() {
                    // The connection is hijacked; this task now belongs to
                    // the spliced session.
                    proxy::proxy_upgrade(reader, writer, &tunnel, &req).await;
                    return;
                }

                if let Err(e) = proxy::proxy_request(&mut writer, &tunnel, &req).await {
                    debug!(%peer_addr, "proxy response write failed: {e}");
                    return;
                }
                if close_after {
                    return;
                }
                continue;
            }
        };

        if respond(&mut writer, &response).await.is_err() {
            return;
        }
        if close_after {
            return;
        }
    }
}

/// Classify one request against the control surface.
///
/// Requests addressed to a tunnel subdomain go straight to the proxy —
/// the control surface only exists on the gateway's own host.
fn classify(req: &Request, domain: Option<&str>) -> Route {
    if let Some(domain) = domain {
        if let Some(id) = host_tunnel_id(req, domain) {
            return Route::Proxy {
                id,
                target: req.target.clone(),
            };
        }
    }

    let (path, _) = split_target(&req.target);

    if path == "/api/status" {
        return Route::ServerStats;
    }
    if path.starts_with("/api/admin/") {
        return Route::Admin;
    }
    if let Some(rest) = path.strip_prefix("/api/tunnels/") {
        if let Some(id) = rest.strip_suffix("/status") {
            return Route::TunnelStats(id.to_string());
        }
    }

    if path == "/" {
        if query_has_flag(&req.target, "new") {
            return Route::Allocate(ids::random_id());
        }
        return Route::Landing;
    }

    if domain.is_some() {
        // Named allocation: exactly one path segment on the gateway host.
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
        if segments.len() == 1 {
            let id = segments[0];
            if !ids::is_valid_id(id) {
                return Route::InvalidId;
            }
            return Route::Allocate(id.to_string());
        }
        return Route::NotFound;
    }

    // No base domain: the first path segment names the tunnel.
    let (id, target) = extract_path_route(&req.target);
    if id.is_empty() {
        return Route::NotFound;
    }
    Route::Proxy { id, target }
}

/// Tunnel id from the request host: lowercase, strip the port, strip the
/// `.domain` suffix. `None` when the host is not a tunnel subdomain.
fn host_tunnel_id(req: &Request, domain: &str) -> Option<String> {
    let host = req.header("host")?;
    let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();
    let id = host.strip_suffix(&format!(".{}", domain.to_ascii_lowercase()))?;
    if id.is_empty() {
        return None;
    }
    Some(id.to_string())
}

/// Split an origin-form target into path and optional query.
fn split_target(target: &str) -> (&str, Option<&str>) {
    match target.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (target, None),
    }
}

/// Whether the query string carries a key, with or without a value.
fn query_has_flag(target: &str, name: &str) -> bool {
    let (_, query) = split_target(target);
    let Some(query) = query else { return false };
    query
        .split('&')
        .any(|pair| pair == name || pair.starts_with(&format!("{name}=")))
}

fn query_param(target: &str, name: &str) -> Option<String> {
    let (_, query) = split_target(target);
    query?
        .split('&')
        .find_map(|pair| pair.strip_prefix(&format!("{name}=")))
        .map(|value| value.to_string())
}

/// Path-based routing: first segment is the id, the rest (plus query)
/// becomes the forwarded target.
fn extract_path_route(target: &str) -> (String, String) {
    let (path, query) = split_target(target);
    let trimmed = path.trim_start_matches('/');
    let (id, rest) = match trimmed.split_once('/') {
        Some((id, rest)) => (id, rest),
        None => (trimmed, ""),
    };

    let mut forwarded = String::with_capacity(rest.len() + 2);
    forwarded.push('/');
    forwarded.push_str(rest);
    if let Some(query) = query {
        forwarded.push('?');
        forwarded.push_str(query);
    }
    (id.to_string(), forwarded)
}

/// API key lookup order: Authorization Bearer, Authorization ApiKey,
/// `api_key` query parameter, `X-API-Key` header.
pub(crate) fn extract_api_key(req: &Request) -> String {
    if let Some(auth) = req.header("authorization") {
        if let Some(key) = auth.strip_prefix("Bearer ") {
            return key.trim().to_string();
        }
        if let Some(key) = auth.strip_prefix("ApiKey ") {
            return key.trim().to_string();
        }
    }
    if let Some(key) = query_param(&req.target, "api_key") {
        if !key.is_empty() {
            return key;
        }
    }
    req.header("x-api-key").unwrap_or_default().trim().to_string()
}

/// Caller IP as the auth subsystem wants it derived.
pub(crate) fn caller_ip(req: &Request, peer_addr: SocketAddr) -> String {
    portway_auth::client_ip(
        &peer_addr.to_string(),
        req.header("x-forwarded-for"),
        req.header("x-real-ip"),
    )
}

fn allocate(req: &Request, id: &str, peer_addr: SocketAddr, registry: &TunnelRegistry) -> Response {
    let client_ip = caller_ip(req, peer_addr);
    let api_key = extract_api_key(req);

    match registry.allocate(id, &client_ip, &api_key) {
        Ok(descriptor) => json_response(&descriptor),
        Err(e @ AllocateError::Auth(_)) => Response::text(401, "Unauthorized", &e.to_string()),
        Err(e @ AllocateError::Conflict(_)) => Response::text(409, "Conflict", &e.to_string()),
    }
}

pub(crate) fn json_response<T: Serialize>(value: &T) -> Response {
    match serde_json::to_vec(value) {
        Ok(body) => Response::new(200, "OK")
            .with_header("Content-Type", "application/json")
            .with_body(body),
        Err(e) => {
            error!("response encoding failed: {e}");
            Response::text(500, "Internal Server Error", "encoding error")
        }
    }
}

pub(crate) fn not_found() -> Response {
    Response::text(404, "Not Found", "404 page not found")
}

async fn respond<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    response: &Response,
) -> Result<(), HttpError> {
    write_response(writer, response).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str, headers: &[(&str, &str)]) -> Request {
        Request {
            method: "GET".into(),
            target: target.into(),
            version: 1,
            headers: headers
                .iter()
                .map(|(n, v)| (n.to_string(), v.to_string()))
                .collect(),
            body: Vec::new(),
        }
    }

    #[test]
    fn test_classify_api_routes() {
        let req = request("/api/status", &[]);
        assert_eq!(classify(&req, None), Route::ServerStats);

        let req = request("/api/admin/keys", &[]);
        assert_eq!(classify(&req, None), Route::Admin);

        let req = request("/api/tunnels/alpha/status", &[]);
        assert_eq!(classify(&req, None), Route::TunnelStats("alpha".into()));
    }

    #[test]
    fn test_classify_allocation_random() {
        let req = request("/?new", &[]);
        match classify(&req, None) {
            Route::Allocate(id) => assert!(ids::is_valid_id(&id)),
            other => panic!("unexpected route {other:?}"),
        }
    }

    #[test]
    fn test_classify_landing() {
        let req = request("/", &[]);
        assert_eq!(classify(&req, None), Route::Landing);
        let req = request("/?other=1", &[]);
        assert_eq!(classify(&req, None), Route::Landing);
    }

    #[test]
    fn test_classify_named_allocation_needs_domain() {
        let req = request("/myapp", &[("Host", "gw.example")]);
        assert_eq!(
            classify(&req, Some("t.example")),
            Route::Allocate("myapp".into())
        );

        // Without a domain the same path is a proxy request.
        assert_eq!(
            classify(&req, None),
            Route::Proxy {
                id: "myapp".into(),
                target: "/".into()
            }
        );
    }

    #[test]
    fn test_classify_named_allocation_rejects_bad_ids() {
        let long = format!("/{}", "a".repeat(64));
        for bad in ["/UPPER", "/abc", "/-lead", long.as_str()] {
            let req = request(bad, &[("Host", "gw.example")]);
            assert_eq!(classify(&req, Some("t.example")), Route::InvalidId, "{bad}");
        }
    }

    #[test]
    fn test_classify_extra_segments_with_domain() {
        let req = request("/one/two", &[("Host", "gw.example")]);
        assert_eq!(classify(&req, Some("t.example")), Route::NotFound);
    }

    #[test]
    fn test_classify_subdomain_proxy_wins_over_control_surface() {
        let req = request("/", &[("Host", "alpha.t.example")]);
        assert_eq!(
            classify(&req, Some("t.example")),
            Route::Proxy {
                id: "alpha".into(),
                target: "/".into()
            }
        );

        // Even API-looking paths on a tunnel host belong to the tunnel.
        let req = request("/api/status", &[("Host", "alpha.t.example:8080")]);
        assert_eq!(
            classify(&req, Some("t.example")),
            Route::Proxy {
                id: "alpha".into(),
                target: "/api/status".into()
            }
        );
    }

    #[test]
    fn test_classify_apex_host_is_not_a_tunnel() {
        let req = request("/", &[("Host", "t.example")]);
        assert_eq!(classify(&req, Some("t.example")), Route::Landing);
    }

    #[test]
    fn test_path_route_extraction() {
        assert_eq!(
            extract_path_route("/beta/x/y?q=1"),
            ("beta".into(), "/x/y?q=1".into())
        );
        assert_eq!(extract_path_route("/beta"), ("beta".into(), "/".into()));
        assert_eq!(
            extract_path_route("/beta?q=1"),
            ("beta".into(), "/?q=1".into())
        );
        assert_eq!(extract_path_route("/"), ("".into(), "/".into()));
    }

    #[test]
    fn test_query_helpers() {
        assert!(query_has_flag("/?new", "new"));
        assert!(query_has_flag("/?a=1&new", "new"));
        assert!(query_has_flag("/?new=x", "new"));
        assert!(!query_has_flag("/?newer", "new"));
        assert!(!query_has_flag("/", "new"));

        assert_eq!(
            query_param("/?api_key=abc&x=1", "api_key").as_deref(),
            Some("abc")
        );
        assert_eq!(query_param("/", "api_key"), None);
    }

    #[test]
    fn test_extract_api_key_order() {
        let req = request("/?api_key=from-query", &[("Authorization", "Bearer from-bearer")]);
        assert_eq!(extract_api_key(&req), "from-bearer");

        let req = request("/?api_key=from-query", &[("Authorization", "ApiKey from-apikey")]);
        assert_eq!(extract_api_key(&req), "from-apikey");

        let req = request("/?api_key=from-query", &[("X-API-Key", "from-header")]);
        assert_eq!(extract_api_key(&req), "from-query");

        let req = request("/", &[("X-API-Key", "from-header")]);
        assert_eq!(extract_api_key(&req), "from-header");

        let req = request("/", &[]);
        assert_eq!(extract_api_key(&req), "");
    }

    #[test]
    fn test_host_tunnel_id_handles_case_and_port() {
        let req = request("/", &[("Host", "Alpha.T.Example:8080")]);
        assert_eq!(host_tunnel_id(&req, "t.example").as_deref(), Some("alpha"));

        let req = request("/", &[("Host", "other.example")]);
        assert_eq!(host_tunnel_id(&req, "t.example"), None);
    }
}

//! Admin API: API-key management under `/api/admin/`.
//!
//! Every admin call must itself present a valid API key; with
//! authentication disabled the whole surface answers 401, since there is
//! nothing to manage and no way to authorize the caller.

use std::net::SocketAddr;

use serde::Deserialize;
use serde_json::json;
use tracing::info;

use portway_auth::TokenManager;
use portway_proto::http::{Request, Response};

use crate::mux::{caller_ip, extract_api_key, json_response, not_found};

#[derive(Debug, Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    ip_whitelist: Vec<String>,
}

/// Route one `/api/admin/*` request.
pub fn handle(req: &Request, auth: &TokenManager, peer_addr: SocketAddr) -> Response {
    let admin_key = extract_api_key(req);
    if admin_key.is_empty() {
        return Response::text(401, "Unauthorized", "Admin API key required");
    }
    if !auth.enabled() || auth.validate_caller(&admin_key, &caller_ip(req, peer_addr)).is_err() {
        return Response::text(401, "Unauthorized", "Invalid admin API key");
    }

    let path = req
        .target
        .split('?')
        .next()
        .unwrap_or(&req.target)
        .trim_start_matches("/api/admin");

    match (req.method.as_str(), path) {
        ("GET", "/keys") => list_keys(auth),
        ("POST", "/keys") => create_key(req, auth),
        ("DELETE", key_path) if key_path.starts_with("/keys/") => {
            delete_key(auth, key_path.trim_start_matches("/keys/"))
        }
        _ => not_found(),
    }
}

fn list_keys(auth: &TokenManager) -> Response {
    json_response(&json!({ "api_keys": auth.keys().list_masked() }))
}

fn create_key(req: &Request, auth: &TokenManager) -> Response {
    let parsed: CreateKeyRequest = match serde_json::from_slice(&req.body) {
        Ok(parsed) => parsed,
        Err(_) => return Response::text(400, "Bad Request", "Invalid JSON"),
    };
    if parsed.name.is_empty() {
        return Response::text(400, "Bad Request", "Name is required");
    }

    let entry = auth
        .keys()
        .add(&parsed.name, &parsed.description, parsed.ip_whitelist);
    info!(name = %entry.name, "admin created API key");

    json_response(&json!({
        "api_key": entry.key,
        "name": entry.name,
        "description": entry.description,
        "created_at": entry.created_at,
    }))
}

fn delete_key(auth: &TokenManager, key: &str) -> Response {
    match auth.keys().remove(key) {
        Ok(()) => Response::new(204, "No Content"),
        Err(e) => Response::text(404, "Not Found", &e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn admin_request(method: &str, target: &str, key: &str, body: &[u8]) -> Request {
        Request {
            method: method.into(),
            target: target.into(),
            version: 1,
            headers: vec![("Authorization".into(), format!("Bearer {key}"))],
            body: body.to_vec(),
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn manager_with_admin_key() -> (Arc<TokenManager>, String) {
        let auth = Arc::new(TokenManager::new(Some("secret"), "issuer", true));
        let key = auth.keys().add("admin", "", vec![]).key;
        (auth, key)
    }

    #[test]
    fn test_requires_key() {
        let (auth, _) = manager_with_admin_key();
        let mut req = admin_request("GET", "/api/admin/keys", "k", &[]);
        req.headers.clear();
        assert_eq!(handle(&req, &auth, peer()).status, 401);
    }

    #[test]
    fn test_rejects_unknown_key() {
        let (auth, _) = manager_with_admin_key();
        let req = admin_request("GET", "/api/admin/keys", "ak_bogus", &[]);
        assert_eq!(handle(&req, &auth, peer()).status, 401);
    }

    #[test]
    fn test_rejected_when_auth_disabled() {
        let auth = TokenManager::disabled();
        let req = admin_request("GET", "/api/admin/keys", "anything", &[]);
        assert_eq!(handle(&req, &auth, peer()).status, 401);
    }

    #[test]
    fn test_list_keys_masked() {
        let (auth, key) = manager_with_admin_key();
        let req = admin_request("GET", "/api/admin/keys", &key, &[]);
        let resp = handle(&req, &auth, peer());
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["api_keys"][0]["key"], "***");
    }

    #[test]
    fn test_create_and_delete_key() {
        let (auth, key) = manager_with_admin_key();

        let body = br#"{"name": "ci", "description": "deploys"}"#;
        let req = admin_request("POST", "/api/admin/keys", &key, body);
        let resp = handle(&req, &auth, peer());
        assert_eq!(resp.status, 200);
        let created: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        let new_key = created["api_key"].as_str().unwrap().to_string();
        assert!(new_key.starts_with("ak_"));

        let req = admin_request("DELETE", &format!("/api/admin/keys/{new_key}"), &key, &[]);
        assert_eq!(handle(&req, &auth, peer()).status, 204);

        let req = admin_request("DELETE", &format!("/api/admin/keys/{new_key}"), &key, &[]);
        assert_eq!(handle(&req, &auth, peer()).status, 404);
    }

    #[test]
    fn test_create_key_validation() {
        let (auth, key) = manager_with_admin_key();

        let req = admin_request("POST", "/api/admin/keys", &key, b"not json");
        assert_eq!(handle(&req, &auth, peer()).status, 400);

        let req = admin_request("POST", "/api/admin/keys", &key, b"{}");
        assert_eq!(handle(&req, &auth, peer()).status, 400);
    }

    #[test]
    fn test_unknown_admin_route() {
        let (auth, key) = manager_with_admin_key();
        let req = admin_request("GET", "/api/admin/nope", &key, &[]);
        assert_eq!(handle(&req, &auth, peer()).status, 404);
    }
}

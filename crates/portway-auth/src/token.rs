//! Tunnel-bound bearer tokens and the [`TokenManager`] facade.
//!
//! Tokens are HS256 JWTs minted at allocation time and bound to one tunnel
//! id. The signing key is the SHA-256 of the configured secret; without a
//! configured secret a random key is generated at startup and tokens do
//! not survive restarts.

use std::sync::RwLock;

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::ip::{extract_ip, IpAllowlist};
use crate::keys::ApiKeyStore;
use crate::rate::RateLimiter;
use crate::AuthError;

/// Token lifetime in hours.
const TOKEN_VALIDITY_HOURS: i64 = 24;

/// Claims carried by a tunnel token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelClaims {
    pub tunnel_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub client_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdomain: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key_id: String,
    pub iss: String,
    pub sub: String,
    pub iat: i64,
    pub exp: i64,
    pub nbf: i64,
    pub jti: String,
}

/// Authentication facade consumed by the gateway.
///
/// Bundles the API-key store, the rate limiter, the optional global IP
/// allowlist and the JWT keys. With `enabled == false` every check is a
/// no-op and minted tokens are empty strings.
pub struct TokenManager {
    enabled: bool,
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    keys: ApiKeyStore,
    limiter: RateLimiter,
    global_allowlist: RwLock<IpAllowlist>,
}

impl TokenManager {
    /// Build a manager. `secret` of `None` (or empty) selects a random
    /// signing key.
    pub fn new(secret: Option<&str>, issuer: &str, enabled: bool) -> Self {
        let key_bytes: [u8; 32] = match secret {
            Some(s) if !s.is_empty() => Sha256::digest(s.as_bytes()).into(),
            _ => {
                if enabled {
                    warn!("no auth secret configured, using a random key; tokens will not survive a restart");
                }
                let mut bytes = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut bytes);
                bytes
            }
        };

        Self {
            enabled,
            issuer: issuer.to_string(),
            encoding_key: EncodingKey::from_secret(&key_bytes),
            decoding_key: DecodingKey::from_secret(&key_bytes),
            keys: ApiKeyStore::new(),
            limiter: RateLimiter::default(),
            global_allowlist: RwLock::new(IpAllowlist::new()),
        }
    }

    /// A manager that accepts everything, for gateways running open.
    pub fn disabled() -> Self {
        Self::new(None, "portway-gateway", false)
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn keys(&self) -> &ApiKeyStore {
        &self.keys
    }

    /// Replace the global IP allowlist. An empty list allows all callers.
    pub fn set_global_allowlist(&self, list: IpAllowlist) {
        *self.global_allowlist.write().unwrap() = list;
    }

    /// Validate an allocation caller: key exists and is enabled, IP passes
    /// the key's and the global allowlist, and the per-IP rate budget has
    /// room. No-op when authentication is disabled.
    pub fn validate_caller(&self, api_key: &str, client_ip: &str) -> Result<(), AuthError> {
        if !self.enabled {
            return Ok(());
        }
        if api_key.is_empty() {
            return Err(AuthError::KeyRequired);
        }
        let key = self.keys.get(api_key).ok_or(AuthError::UnknownKey)?;
        if !key.enabled {
            return Err(AuthError::KeyDisabled);
        }

        let ip = extract_ip(client_ip);
        if !key_allows_ip(&key.ip_whitelist, &ip) {
            return Err(AuthError::IpNotAllowed(ip));
        }
        if !self.global_allowlist.read().unwrap().allows(&ip) {
            return Err(AuthError::IpNotInGlobalAllowlist(ip));
        }
        if !self.limiter.is_allowed(&ip) {
            return Err(AuthError::RateLimited(ip));
        }

        self.keys.touch(api_key);
        Ok(())
    }

    /// Mint a token bound to `tunnel_id`. Empty string when disabled.
    pub fn mint_tunnel_token(
        &self,
        tunnel_id: &str,
        client_ip: &str,
        subdomain: &str,
        api_key: &str,
    ) -> Result<String, AuthError> {
        if !self.enabled {
            return Ok(String::new());
        }

        let now = Utc::now();
        let claims = TunnelClaims {
            tunnel_id: tunnel_id.to_string(),
            client_ip: extract_ip(client_ip),
            subdomain: subdomain.to_string(),
            api_key_id: api_key.to_string(),
            iss: self.issuer.clone(),
            sub: tunnel_id.to_string(),
            iat: now.timestamp(),
            exp: (now + Duration::hours(TOKEN_VALIDITY_HOURS)).timestamp(),
            nbf: now.timestamp(),
            jti: generate_jti(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| AuthError::TokenInvalid(e.to_string()))
    }

    /// Decode and verify a tunnel token: HS256 signature, expiry, not-
    /// before, and issuer.
    pub fn validate_tunnel_token(&self, token: &str) -> Result<TunnelClaims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::TokenMissing);
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);

        let data = decode::<TunnelClaims>(token, &self.decoding_key, &validation).map_err(|e| {
            debug!("token validation failed: {e}");
            AuthError::TokenInvalid(e.to_string())
        })?;

        Ok(data.claims)
    }
}

/// Per-key allowlist semantics: empty allows all; entries match by exact
/// string or by CIDR containment.
fn key_allows_ip(whitelist: &[String], ip: &str) -> bool {
    if whitelist.is_empty() {
        return true;
    }
    whitelist.iter().any(|entry| {
        entry == ip
            || IpAllowlist::from_entries(std::slice::from_ref(entry))
                .map(|list| list.allows(ip))
                .unwrap_or(false)
    })
}

fn generate_jti() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

//! Authentication for the portway gateway.
//!
//! The gateway consumes one object, [`TokenManager`], which bundles the
//! API-key store, the per-IP rate limiter, the optional IP allowlists and
//! the HS256 tunnel tokens bound to individual tunnel ids. When
//! authentication is disabled every check is a no-op and minted tokens are
//! empty, so callers never branch on the mode themselves.

pub mod ip;
pub mod keys;
pub mod rate;
pub mod token;

pub use ip::{client_ip, IpAllowlist, IpAllowlistError};
pub use keys::{ApiKey, ApiKeyStore};
pub use rate::RateLimiter;
pub use token::{TokenManager, TunnelClaims};

use thiserror::Error;

/// Authentication failures, all surfaced to HTTP callers as 401.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("API key required")]
    KeyRequired,

    #[error("invalid API key")]
    UnknownKey,

    #[error("API key disabled")]
    KeyDisabled,

    #[error("IP {0} not in whitelist for this API key")]
    IpNotAllowed(String),

    #[error("IP {0} not in global whitelist")]
    IpNotInGlobalAllowlist(String),

    #[error("rate limit exceeded for IP {0}")]
    RateLimited(String),

    #[error("no token provided")]
    TokenMissing,

    #[error("token validation failed: {0}")]
    TokenInvalid(String),

    #[error("invalid token issuer")]
    WrongIssuer,

    #[error("API key not found")]
    KeyNotFound,
}

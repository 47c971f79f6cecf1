//! Tunnel registry: the map from tunnel id to pool and metadata.
//!
//! Records are created only by the allocation path and removed only by
//! retirement; a dial-in can attach endpoints to an existing record but
//! never creates one. The map is sharded (dashmap), so lookups for
//! unrelated ids never contend and the janitor takes no global lock.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use portway_auth::{AuthError, TokenManager};
use portway_proto::{ServerStats, TunnelDescriptor, TunnelStatus};

use crate::mem;
use crate::pool::Pool;

/// Tunnels idle longer than this are retired by the janitor.
pub const DEFAULT_INACTIVE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Last-access stamp: wall clock for reporting, monotonic for staleness.
struct AccessStamp {
    wall: DateTime<Utc>,
    mono: Instant,
}

impl AccessStamp {
    fn now() -> Self {
        Self {
            wall: Utc::now(),
            mono: Instant::now(),
        }
    }
}

/// One registered tunnel: identity, bound credential, pool and stamps.
pub struct Tunnel {
    id: String,
    /// Bearer token agents must present on dial-in; empty when the
    /// gateway runs without authentication.
    token: String,
    created_at: DateTime<Utc>,
    access: Mutex<AccessStamp>,
    pool: Pool,
}

impl Tunnel {
    fn new(id: String, token: String) -> Self {
        Self {
            id,
            token,
            created_at: Utc::now(),
            access: Mutex::new(AccessStamp::now()),
            pool: Pool::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Stamp the tunnel as just used.
    pub fn touch(&self) {
        *self.access.lock().unwrap() = AccessStamp::now();
    }

    pub fn last_access(&self) -> DateTime<Utc> {
        self.access.lock().unwrap().wall
    }

    /// Time since the last touch, on the monotonic clock.
    pub fn idle_for(&self) -> Duration {
        self.access.lock().unwrap().mono.elapsed()
    }

    pub fn status(&self) -> TunnelStatus {
        TunnelStatus {
            connected_sockets: self.pool.len(),
            created_at: self.created_at.timestamp(),
            last_access: self.last_access().timestamp(),
        }
    }
}

/// Allocation failures, mapped to HTTP statuses by the multiplexer.
#[derive(Debug, Error)]
pub enum AllocateError {
    #[error("ID {0} already exists")]
    Conflict(String),

    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
}

/// The concurrent id → tunnel map plus the knobs descriptors advertise.
pub struct TunnelRegistry {
    tunnels: DashMap<String, Arc<Tunnel>>,
    auth: Arc<TokenManager>,
    tunnel_port: u16,
    max_conn_count: usize,
    domain: Option<String>,
    secure: bool,
}

impl TunnelRegistry {
    pub fn new(
        auth: Arc<TokenManager>,
        tunnel_port: u16,
        max_conn_count: usize,
        domain: Option<String>,
        secure: bool,
    ) -> Self {
        Self {
            tunnels: DashMap::new(),
            auth,
            tunnel_port,
            max_conn_count,
            domain,
            secure,
        }
    }

    pub fn auth(&self) -> &TokenManager {
        &self.auth
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn tunnel_port(&self) -> u16 {
        self.tunnel_port
    }

    /// Allocate a tunnel id for a caller.
    ///
    /// The vacant-entry guard makes the conflict check and the insert
    /// atomic: of two concurrent allocations for one id, exactly one wins.
    /// Credentials are checked, and the tunnel-bound token minted, before
    /// the record becomes visible.
    pub fn allocate(
        &self,
        id: &str,
        client_ip: &str,
        api_key: &str,
    ) -> Result<TunnelDescriptor, AllocateError> {
        match self.tunnels.entry(id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(_) => {
                Err(AllocateError::Conflict(id.to_string()))
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                self.auth.validate_caller(api_key, client_ip)?;
                let token = self.auth.mint_tunnel_token(id, client_ip, id, api_key)?;

                let tunnel = Arc::new(Tunnel::new(id.to_string(), token.clone()));
                slot.insert(tunnel);
                info!(id, "allocated tunnel");

                Ok(TunnelDescriptor {
                    id: id.to_string(),
                    port: self.tunnel_port,
                    max_conn_count: self.max_conn_count,
                    url: self.public_url(id),
                    auth_required: self.auth.enabled(),
                    token: if self.auth.enabled() { Some(token) } else { None },
                })
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<Tunnel>> {
        self.tunnels.get(id).map(|entry| entry.value().clone())
    }

    /// Remove a tunnel and close every endpoint it still holds. Retiring
    /// an absent id is a no-op.
    pub async fn retire(&self, id: &str) {
        if let Some((_, tunnel)) = self.tunnels.remove(id) {
            let endpoints = tunnel.pool().drain();
            info!(id, endpoints = endpoints.len(), "retired tunnel");
            for endpoint in endpoints {
                endpoint.close().await;
            }
        }
    }

    /// Retire every tunnel idle longer than `max_idle`. Called by the
    /// janitor on its five-minute tick.
    pub async fn retire_stale(&self, max_idle: Duration) {
        let stale: Vec<String> = self
            .tunnels
            .iter()
            .filter(|entry| entry.value().idle_for() > max_idle)
            .map(|entry| entry.key().clone())
            .collect();

        for id in stale {
            debug!(id, "tunnel exceeded inactivity threshold");
            self.retire(&id).await;
        }
    }

    pub fn count(&self) -> usize {
        self.tunnels.len()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            tunnels: self.count(),
            auth_enabled: self.auth.enabled(),
            tunnel_port: self.tunnel_port,
            mem: mem::snapshot(),
        }
    }

    /// Public URL advertised in descriptors; empty without a base domain.
    fn public_url(&self, id: &str) -> String {
        match &self.domain {
            Some(domain) => {
                let scheme = if self.secure { "https" } else { "http" };
                format!("{scheme}://{id}.{domain}")
            }
            None => String::new(),
        }
    }
}

//! Gateway configuration.

use std::net::IpAddr;
use std::time::Duration;

use portway_proto::TUNNEL_PORT;

use crate::registry::DEFAULT_INACTIVE_AFTER;

/// How often the janitor sweeps the registry.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Default cap advertised to agents per tunnel.
pub const DEFAULT_MAX_CONN_COUNT: usize = 10;

/// Everything a [`crate::Gateway`] needs to come up.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Address both listeners bind to.
    pub bind_addr: IpAddr,
    /// Public HTTP port. Port 0 binds an ephemeral port.
    pub http_port: u16,
    /// Tunnel port agents dial. Port 0 binds an ephemeral port.
    pub tunnel_port: u16,
    /// Base domain for subdomain routing; `None` selects path routing.
    pub domain: Option<String>,
    /// Advertise https URLs in descriptors.
    pub secure: bool,
    /// Redirect target for bare `/` requests.
    pub landing_url: String,
    /// Endpoint cap advertised in descriptors (not enforced on dial-in).
    pub max_conn_count: usize,
    /// Idle age after which the janitor retires a tunnel.
    pub inactive_after: Duration,
    /// Janitor tick.
    pub sweep_interval: Duration,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::from([127, 0, 0, 1]),
            http_port: 8080,
            tunnel_port: TUNNEL_PORT,
            domain: None,
            secure: false,
            landing_url: "https://portway-dev.github.io/www/".to_string(),
            max_conn_count: DEFAULT_MAX_CONN_COUNT,
            inactive_after: DEFAULT_INACTIVE_AFTER,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl GatewayConfig {
    pub fn with_bind_addr(mut self, addr: IpAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn with_http_port(mut self, port: u16) -> Self {
        self.http_port = port;
        self
    }

    pub fn with_tunnel_port(mut self, port: u16) -> Self {
        self.tunnel_port = port;
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    pub fn with_landing_url(mut self, url: impl Into<String>) -> Self {
        self.landing_url = url.into();
        self
    }

    pub fn with_inactive_after(mut self, age: Duration) -> Self {
        self.inactive_after = age;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.tunnel_port, 62322);
        assert_eq!(config.max_conn_count, 10);
        assert!(config.domain.is_none());
        assert_eq!(config.inactive_after, Duration::from_secs(3600));
    }

    #[test]
    fn test_builders() {
        let config = GatewayConfig::default()
            .with_domain("t.example")
            .with_secure(true)
            .with_http_port(0)
            .with_tunnel_port(0);
        assert_eq!(config.domain.as_deref(), Some("t.example"));
        assert!(config.secure);
        assert_eq!(config.http_port, 0);
    }
}

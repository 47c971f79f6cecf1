//! Agent configuration.

/// Everything a [`crate::Supervisor`] needs to keep a tunnel alive.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Gateway tunnel endpoint, `host:port`.
    pub gateway_addr: String,
    /// Tunnel id from the descriptor.
    pub tunnel_id: String,
    /// Bearer token from the descriptor; `None` when the gateway runs
    /// without authentication.
    pub token: Option<String>,
    /// Loopback port the local service listens on.
    pub local_port: u16,
    /// Number of tunnel connections to maintain.
    pub connections: usize,
}

impl AgentConfig {
    pub fn new(gateway_addr: impl Into<String>, tunnel_id: impl Into<String>, local_port: u16) -> Self {
        Self {
            gateway_addr: gateway_addr.into(),
            tunnel_id: tunnel_id.into(),
            token: None,
            local_port,
            connections: 1,
        }
    }

    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = AgentConfig::new("gw:62322", "alpha", 3000)
            .with_token(Some("tok".into()))
            .with_connections(10);
        assert_eq!(config.gateway_addr, "gw:62322");
        assert_eq!(config.connections, 10);
        assert_eq!(config.token.as_deref(), Some("tok"));
    }

    #[test]
    fn test_empty_token_is_none() {
        let config = AgentConfig::new("gw:62322", "alpha", 3000).with_token(Some(String::new()));
        assert!(config.token.is_none());
    }

    #[test]
    fn test_connections_floor() {
        let config = AgentConfig::new("gw:62322", "alpha", 3000).with_connections(0);
        assert_eq!(config.connections, 1);
    }
}

//! Gateway composition: both listeners, the registry and the janitor.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

use portway_auth::TokenManager;

use crate::config::GatewayConfig;
use crate::listener::TunnelListener;
use crate::mux::PublicServer;
use crate::registry::TunnelRegistry;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: SocketAddr,
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bound but not yet running gateway.
///
/// Binding is separate from running so callers (and tests) can learn the
/// actual listener addresses before traffic starts.
pub struct Gateway {
    config: GatewayConfig,
    registry: Arc<TunnelRegistry>,
    http_listener: TcpListener,
    tunnel_listener: TcpListener,
    http_addr: SocketAddr,
    tunnel_addr: SocketAddr,
}

impl Gateway {
    /// Bind both listeners and build the registry.
    ///
    /// The registry advertises the *bound* tunnel port, so configuring
    /// port 0 yields descriptors that point at the real ephemeral port.
    pub async fn bind(config: GatewayConfig, auth: Arc<TokenManager>) -> Result<Self, GatewayError> {
        let http_bind = SocketAddr::new(config.bind_addr, config.http_port);
        let http_listener = TcpListener::bind(http_bind)
            .await
            .map_err(|source| GatewayError::Bind {
                address: http_bind,
                source,
            })?;
        let http_addr = http_listener.local_addr()?;

        let tunnel_bind = SocketAddr::new(config.bind_addr, config.tunnel_port);
        let tunnel_listener =
            TcpListener::bind(tunnel_bind)
                .await
                .map_err(|source| GatewayError::Bind {
                    address: tunnel_bind,
                    source,
                })?;
        let tunnel_addr = tunnel_listener.local_addr()?;

        let registry = Arc::new(TunnelRegistry::new(
            auth,
            tunnel_addr.port(),
            config.max_conn_count,
            config.domain.clone(),
            config.secure,
        ));

        Ok(Self {
            config,
            registry,
            http_listener,
            tunnel_listener,
            http_addr,
            tunnel_addr,
        })
    }

    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn tunnel_addr(&self) -> SocketAddr {
        self.tunnel_addr
    }

    pub fn registry(&self) -> Arc<TunnelRegistry> {
        self.registry.clone()
    }

    /// Run both accept loops and the janitor until failure.
    pub async fn run(self) -> Result<(), GatewayError> {
        info!(
            http = %self.http_addr,
            tunnel = %self.tunnel_addr,
            domain = self.config.domain.as_deref().unwrap_or("<path routing>"),
            "gateway up"
        );

        let janitor = tokio::spawn(janitor_loop(
            self.registry.clone(),
            self.config.sweep_interval,
            self.config.inactive_after,
        ));

        let public = PublicServer::new(
            self.http_listener,
            self.registry.clone(),
            self.config.landing_url.clone(),
        );
        let tunnels = TunnelListener::new(self.tunnel_listener, self.registry.clone());

        let result = tokio::try_join!(public.run(), tunnels.run());
        janitor.abort();
        result?;
        Ok(())
    }
}

/// Periodic sweep retiring tunnels past the inactivity threshold.
async fn janitor_loop(
    registry: Arc<TunnelRegistry>,
    sweep_interval: std::time::Duration,
    inactive_after: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(sweep_interval);
    // The first tick fires immediately; skip it so a fresh gateway does
    // not sweep before anything can have aged.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        debug!("janitor sweep");
        registry.retire_stale(inactive_after).await;
    }
}

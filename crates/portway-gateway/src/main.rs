//! Gateway binary.

use std::net::IpAddr;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portway_auth::{IpAllowlist, TokenManager};
use portway_gateway::{Gateway, GatewayConfig};

/// Public gateway: exposes local services through agent-maintained tunnels.
#[derive(Parser, Debug)]
#[command(name = "portway-gateway", version, about)]
struct Cli {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    bind: IpAddr,

    /// Public HTTP port
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Tunnel port agents dial in to
    #[arg(long, default_value_t = portway_proto::TUNNEL_PORT)]
    tunnel_port: u16,

    /// Base domain for subdomain routing (e.g. tunnel.example.com);
    /// without it, tunnels are addressed by the first path segment
    #[arg(long)]
    domain: Option<String>,

    /// Advertise https URLs in tunnel descriptors
    #[arg(long)]
    secure: bool,

    /// Require API-key authentication for allocation and dial-ins
    #[arg(long)]
    auth: bool,

    /// Token signing secret; a random one is generated when omitted
    #[arg(long, env = "PORTWAY_AUTH_SECRET")]
    auth_secret: Option<String>,

    /// Issuer name embedded in tunnel tokens
    #[arg(long, default_value = "portway-gateway")]
    issuer: String,

    /// Comma-separated global IP allowlist (addresses or CIDR ranges)
    #[arg(long)]
    ip_allowlist: Option<String>,

    /// Create one API key with this name at startup and log it
    #[arg(long)]
    create_api_key: Option<String>,

    /// Redirect target for bare requests to /
    #[arg(long, default_value = "https://portway-dev.github.io/www/")]
    landing: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let enabled = cli.auth || cli.auth_secret.is_some();
    let auth = Arc::new(TokenManager::new(
        cli.auth_secret.as_deref(),
        &cli.issuer,
        enabled,
    ));
    if enabled {
        info!(issuer = %cli.issuer, "authentication enabled");
        if let Some(list) = &cli.ip_allowlist {
            let entries: Vec<&str> = list.split(',').map(str::trim).collect();
            auth.set_global_allowlist(IpAllowlist::from_entries(&entries)?);
        }
        if let Some(name) = &cli.create_api_key {
            let entry = auth.keys().add(name, "created at startup", vec![]);
            info!(name = %name, key = %entry.key, "created API key");
        }
    } else {
        info!("authentication disabled, accepting all agents");
    }

    let mut config = GatewayConfig::default()
        .with_bind_addr(cli.bind)
        .with_http_port(cli.port)
        .with_tunnel_port(cli.tunnel_port)
        .with_secure(cli.secure)
        .with_landing_url(cli.landing);
    if let Some(domain) = cli.domain {
        config = config.with_domain(domain);
    }

    let gateway = Gateway::bind(config, auth).await?;

    tokio::select! {
        result = gateway.run() => result?,
        _ = signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

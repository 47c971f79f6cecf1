//! Agent binary.

use anyhow::Result;
use clap::Parser;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portway_agent::{parse_server_url, request_tunnel, AgentConfig, Supervisor};

/// Expose a local service through a portway gateway.
#[derive(Parser, Debug)]
#[command(name = "portway-agent", version, about)]
struct Cli {
    /// Gateway base URL
    #[arg(long, default_value = "http://localhost:8080")]
    server: String,

    /// Local port to expose
    #[arg(long, default_value_t = 80)]
    port: u16,

    /// Request a specific tunnel id (needs a gateway with a base domain)
    #[arg(long)]
    subdomain: Option<String>,

    /// API key, required when the gateway has authentication enabled
    #[arg(long, env = "PORTWAY_API_KEY")]
    api_key: Option<String>,

    /// Number of tunnel connections; defaults to the gateway's advertised cap
    #[arg(long)]
    connections: Option<usize>,

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

    let descriptor = request_tunnel(
        &cli.server,
        cli.subdomain.as_deref(),
        cli.api_key.as_deref(),
    )
    .await?;

    let public_url = if descriptor.url.is_empty() {
        format!("{}/{}", cli.server.trim_end_matches('/'), descriptor.id)
    } else {
        descriptor.url.clone()
    };

    info!(id = %descriptor.id, "tunnel allocated");
    info!(url = %public_url, "public URL");
    info!(
        local = %format!("127.0.0.1:{}", cli.port),
        auth = descriptor.auth_required,
        "forwarding"
    );

    let server = parse_server_url(&cli.server)?;
    let gateway_addr = format!("{}:{}", server.hostname(), descriptor.port);

    let config = AgentConfig::new(gateway_addr, descriptor.id, cli.port)
        .with_token(descriptor.token)
        .with_connections(cli.connections.unwrap_or(descriptor.max_conn_count));

    tokio::select! {
        _ = Supervisor::new(config).run() => {}
        _ = signal::ctrl_c() => info!("shutting down"),
    }
    Ok(())
}

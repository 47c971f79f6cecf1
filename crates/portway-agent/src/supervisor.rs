//! Connection pool supervisor.
//!
//! N independent workers each keep one tunnel connection alive: dial the
//! gateway, send the handshake lines, serve framed exchanges until the
//! socket dies, reconnect. Dial failures back off for a fixed second —
//! deliberately not exponential, so a recovering gateway is rediscovered
//! promptly without being hammered while down.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::sleep;
use tracing::{debug, info};

use portway_proto::write_handshake;

use crate::config::AgentConfig;
use crate::handler;

/// Fixed delay between failed dials. Part of the wire contract, not a
/// tunable.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keeps `config.connections` endpoints alive against one gateway.
pub struct Supervisor {
    config: AgentConfig,
}

impl Supervisor {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run all workers. Never returns in normal operation; callers race
    /// it against shutdown.
    pub async fn run(self) {
        info!(
            gateway = %self.config.gateway_addr,
            tunnel = %self.config.tunnel_id,
            connections = self.config.connections,
            "starting tunnel workers"
        );

        let workers: Vec<_> = (0..self.config.connections)
            .map(|index| {
                let config = self.config.clone();
                tokio::spawn(worker(index, config))
            })
            .collect();

        for handle in workers {
            let _ = handle.await;
        }
    }
}

/// One reconnect-forever worker.
async fn worker(index: usize, config: AgentConfig) {
    loop {
        let mut stream = match TcpStream::connect(&config.gateway_addr).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(worker = index, "dial {} failed: {e}", config.gateway_addr);
                sleep(RECONNECT_DELAY).await;
                continue;
            }
        };

        if let Err(e) = write_handshake(&mut stream, &config.tunnel_id, config.token.as_deref()).await
        {
            debug!(worker = index, "handshake write failed: {e}");
            sleep(RECONNECT_DELAY).await;
            continue;
        }

        debug!(worker = index, "endpoint established");
        handler::run_endpoint(stream, config.local_port).await;
        debug!(worker = index, "endpoint ended, reconnecting");
    }
}

//! The tunnel-port listener.
//!
//! Agents dial this port, speak the two-line handshake, and become pooled
//! endpoints. Nothing is ever written back during the handshake: success
//! is the socket staying open, and every failure path just drops the
//! connection after logging. There is deliberately no read deadline on
//! the handshake lines.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, trace};

use portway_proto::read_handshake_line;

use crate::endpoint::Endpoint;
use crate::registry::TunnelRegistry;

/// Accept loop for agent dial-ins.
pub struct TunnelListener {
    listener: TcpListener,
    registry: Arc<TunnelRegistry>,
}

impl TunnelListener {
    pub fn new(listener: TcpListener, registry: Arc<TunnelRegistry>) -> Self {
        Self { listener, registry }
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept forever, one handshake task per dial-in.
    pub async fn run(self) -> std::io::Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    trace!(%peer_addr, "tunnel dial-in");
                    let registry = self.registry.clone();
                    tokio::spawn(async move {
                        handle_dial_in(stream, peer_addr, registry).await;
                    });
                }
                Err(e) => {
                    error!("tunnel listener accept error: {e}");
                }
            }
        }
    }
}

/// Run the handshake for one dial-in and attach it to its pool.
///
/// Dropping the halves on any early return closes the socket, which is the
/// whole of the failure protocol.
async fn handle_dial_in(stream: TcpStream, peer_addr: SocketAddr, registry: Arc<TunnelRegistry>) {
    let (read_half, write_half) = stream.into_split();
    // This reader stays with the endpoint for its whole life; bytes the
    // agent sends right after the handshake are already buffered here.
    let mut reader = BufReader::new(read_half);

    let id = match read_handshake_line(&mut reader).await {
        Ok(Some(id)) if !id.is_empty() => id,
        Ok(_) => {
            debug!(%peer_addr, "dial-in closed before sending a tunnel id");
            return;
        }
        Err(e) => {
            debug!(%peer_addr, "error reading tunnel id: {e}");
            return;
        }
    };
    let id = id.as_str();

    let auth = registry.auth();
    let mut token = String::new();
    if auth.enabled() {
        token = match read_handshake_line(&mut reader).await {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!(%peer_addr, id, "dial-in closed before sending a token");
                return;
            }
            Err(e) => {
                debug!(%peer_addr, id, "error reading token: {e}");
                return;
            }
        };

        let claims = match auth.validate_tunnel_token(&token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!(%peer_addr, id, "invalid token on dial-in: {e}");
                return;
            }
        };
        if claims.tunnel_id != id {
            debug!(
                %peer_addr,
                advertised = id,
                bound = %claims.tunnel_id,
                "token bound to a different tunnel id"
            );
            return;
        }
    }

    let tunnel = match registry.lookup(id) {
        Some(tunnel) => tunnel,
        None => {
            debug!(%peer_addr, id, "dial-in for unknown tunnel id");
            return;
        }
    };

    // The record's own token must match byte for byte, on top of the JWT
    // being valid for the advertised id.
    if auth.enabled() && tunnel.token() != token {
        debug!(%peer_addr, id, "token does not match the allocated tunnel");
        return;
    }

    let endpoint = Endpoint::from_parts(reader, write_half, peer_addr);
    debug!(%peer_addr, id, endpoint = endpoint.id(), "endpoint attached");
    tunnel.touch();
    tunnel.pool().attach(endpoint);
}

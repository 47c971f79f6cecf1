//! Request and upgrade proxying onto tunnel endpoints.
//!
//! A framed exchange writes the public request onto a pooled endpoint and
//! parses one response from the endpoint's long-lived reader. Any error on
//! the endpoint sacrifices it — detach, close, 502 to the client — and the
//! agent's reconnect loop restores capacity. A successful exchange leaves
//! the endpoint in the pool untouched.
//!
//! Upgrades hijack the public socket instead: the endpoint leaves the pool
//! for good, the request is forwarded, and from then on bytes are copied
//! both ways with no framing assumed. The gateway does not look at the
//! response status before splicing; the agent forwards the 101 through the
//! same channel.

use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use portway_proto::http::{
    read_response, write_request, write_response, HttpError, Request, Response,
};

use crate::endpoint::Endpoint;
use crate::registry::Tunnel;

fn no_connections() -> Response {
    Response::text(502, "Bad Gateway", "No available connections")
}

fn proxy_error() -> Response {
    Response::text(502, "Bad Gateway", "Proxy error")
}

/// Proxy one ordinary request over a pooled endpoint.
///
/// The returned error means the *public* socket failed; endpoint failures
/// are absorbed here and surface to the client as 502.
pub async fn proxy_request<W: tokio::io::AsyncWrite + Unpin>(
    writer: &mut W,
    tunnel: &Tunnel,
    req: &Request,
) -> Result<(), HttpError> {
    tunnel.touch();

    let Some(endpoint) = tunnel.pool().next() else {
        return write_response(writer, &no_connections()).await;
    };

    match exchange(&endpoint, req).await {
        Ok(resp) => {
            let exhausted = resp.close_delimited;
            write_response(writer, &resp).await?;
            if exhausted {
                // The agent signalled end-of-body by closing; the socket
                // cannot carry another framed exchange.
                tunnel.pool().detach(&endpoint).await;
            }
            Ok(())
        }
        Err(e) => {
            debug!(
                tunnel = tunnel.id(),
                endpoint = endpoint.id(),
                "endpoint exchange failed: {e}"
            );
            tunnel.pool().detach(&endpoint).await;
            write_response(writer, &proxy_error()).await
        }
    }
}

/// One framed exchange: write the request, then read one response.
///
/// Each half is locked only for the single message moving through it,
/// never for the exchange as a whole. Selection from the pool grants no
/// exclusivity: handlers that picked the same endpoint concurrently both
/// proceed, and a handler may read back the response to the other's
/// request. That interleaving is the pool's documented discipline; the
/// cursor only spreads load, it does not serialize.
async fn exchange(endpoint: &Endpoint, req: &Request) -> Result<Response, HttpError> {
    {
        let mut ep_writer = endpoint.lock_writer().await;
        write_request(&mut *ep_writer, req).await?;
    }
    let mut ep_reader = endpoint.lock_reader().await;
    read_response(&mut *ep_reader).await
}

/// Proxy a WebSocket upgrade by splicing the hijacked public socket onto
/// an endpoint.
///
/// Returns when the endpoint→public direction ends; the public→endpoint
/// copy keeps running in its own task until it finishes naturally. The
/// endpoint is closed exactly once (the close claim is atomic) no matter
/// which direction exits first.
pub async fn proxy_upgrade(
    public_reader: BufReader<OwnedReadHalf>,
    mut public_writer: OwnedWriteHalf,
    tunnel: &Tunnel,
    req: &Request,
) {
    tunnel.touch();

    let Some(endpoint) = tunnel.pool().next() else {
        debug!(tunnel = tunnel.id(), "upgrade with no available connections");
        return;
    };
    // Opaque mode from here on: the endpoint never returns to the pool.
    tunnel.pool().remove(&endpoint);

    let mut ep_writer = endpoint.lock_writer().await;
    let mut ep_reader = endpoint.lock_reader().await;

    if let Err(e) = write_request(&mut *ep_writer, req).await {
        debug!(
            tunnel = tunnel.id(),
            endpoint = endpoint.id(),
            "failed to forward upgrade request: {e}"
        );
        if endpoint.mark_closed() {
            let _ = ep_writer.shutdown().await;
        }
        return;
    }

    debug!(
        tunnel = tunnel.id(),
        endpoint = endpoint.id(),
        "upgrade spliced"
    );

    let endpoint_for_task: Arc<Endpoint> = endpoint.clone();
    tokio::spawn(async move {
        let mut public_reader = public_reader;
        let _ = tokio::io::copy(&mut public_reader, &mut *ep_writer).await;
        if endpoint_for_task.mark_closed() {
            let _ = ep_writer.shutdown().await;
        }
    });

    let _ = tokio::io::copy(&mut *ep_reader, &mut public_writer).await;
    let _ = public_writer.shutdown().await;
    endpoint.mark_closed();
}

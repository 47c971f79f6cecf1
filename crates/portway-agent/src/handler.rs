//! Per-endpoint request handler.
//!
//! One endpoint socket carries one framed exchange at a time: read a
//! request from the gateway, replay it against the loopback service,
//! write the response back, repeat. A WebSocket upgrade (101 against an
//! `Upgrade: websocket` request) ends framed mode: the 101 head goes back
//! over the endpoint and both sockets are spliced until the session ends.
//! Returning from here hands the socket's fate back to the supervisor,
//! which reconnects.

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use portway_proto::http::{read_request, read_response, write_request, write_response, Response};

fn synthetic_bad_gateway() -> Response {
    Response::text(502, "Bad Gateway", "Bad Gateway")
}

/// Serve framed exchanges on one endpoint socket until it dies or goes
/// opaque.
pub async fn run_endpoint(stream: TcpStream, local_port: u16) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut writer = write_half;

    loop {
        let req = match read_request(&mut reader).await {
            Ok(Some(req)) => req,
            Ok(None) => {
                trace!("gateway closed the endpoint");
                return;
            }
            Err(e) => {
                debug!("failed to read request from gateway: {e}");
                return;
            }
        };
        trace!(method = %req.method, target = %req.target, "tunnel request");

        let local = match TcpStream::connect(("127.0.0.1", local_port)).await {
            Ok(local) => local,
            Err(e) => {
                debug!(local_port, "failed to connect to local service: {e}");
                if write_response(&mut writer, &synthetic_bad_gateway())
                    .await
                    .is_err()
                {
                    return;
                }
                continue;
            }
        };
        let (local_read, mut local_write) = local.into_split();
        let mut local_reader = BufReader::new(local_read);

        if let Err(e) = write_request(&mut local_write, &req).await {
            debug!("failed to write request to local service: {e}");
            continue;
        }

        let resp = match read_response(&mut local_reader).await {
            Ok(resp) => resp,
            Err(e) => {
                debug!("failed to read local response: {e}");
                continue;
            }
        };

        if req.is_websocket_upgrade() && resp.status == 101 {
            trace!("upgrade accepted, going opaque");
            if write_response(&mut writer, &resp).await.is_err() {
                return;
            }

            // Gateway → local runs concurrently; local → gateway is the
            // synchronous direction whose end tears the session down.
            let pump = tokio::spawn(async move {
                let mut reader = reader;
                let mut local_write = local_write;
                let _ = tokio::io::copy(&mut reader, &mut local_write).await;
            });

            let _ = tokio::io::copy(&mut local_reader, &mut writer).await;
            let _ = writer.shutdown().await;
            pump.abort();
            return;
        }

        if let Err(e) = write_response(&mut writer, &resp).await {
            debug!("failed to write response to gateway: {e}");
            return;
        }
        // Local halves drop here: one loopback connection per exchange.
    }
}

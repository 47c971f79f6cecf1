//! One agent-facing tunnel socket.
//!
//! An endpoint keeps the read half behind a single [`BufReader`] for its
//! whole life; successive responses are parsed from that one reader so
//! bytes buffered past a message boundary are never lost. Each half sits
//! behind its own async lock held only while one message moves through
//! it — the shared buffer needs an exclusive borrow per read, nothing
//! more. Picking an endpoint from the pool grants no exclusivity, and
//! concurrent users interleave at message granularity. Only the upgrade
//! path, once the endpoint has left the pool, holds the locks for the
//! lifetime of the spliced session.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

/// The long-lived buffered reader over an endpoint's read half.
pub type EndpointReader = BufReader<OwnedReadHalf>;

static NEXT_ENDPOINT_ID: AtomicU64 = AtomicU64::new(1);

/// One pooled tunnel socket.
pub struct Endpoint {
    id: u64,
    peer_addr: SocketAddr,
    reader: Arc<Mutex<EndpointReader>>,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    closed: AtomicBool,
}

impl Endpoint {
    /// Wrap a freshly accepted socket.
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Arc<Self> {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(BufReader::new(read_half), write_half, peer_addr)
    }

    /// Wrap a socket whose read half already carries a buffered reader,
    /// as after the tunnel-port handshake.
    pub fn from_parts(
        reader: EndpointReader,
        writer: OwnedWriteHalf,
        peer_addr: SocketAddr,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ENDPOINT_ID.fetch_add(1, Ordering::SeqCst),
            peer_addr,
            reader: Arc::new(Mutex::new(reader)),
            writer: Arc::new(Mutex::new(writer)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub async fn lock_reader(&self) -> OwnedMutexGuard<EndpointReader> {
        self.reader.clone().lock_owned().await
    }

    pub async fn lock_writer(&self) -> OwnedMutexGuard<OwnedWriteHalf> {
        self.writer.clone().lock_owned().await
    }

    /// Claim the right to close this endpoint. Returns true for exactly
    /// one caller; whoever wins performs the shutdown.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Close the socket toward the agent. Safe to call repeatedly; only
    /// the first call shuts the write half down. Must not be called while
    /// holding this endpoint's writer lock.
    pub async fn close(&self) {
        if self.mark_closed() {
            trace!(endpoint = self.id, "closing endpoint");
            let mut writer = self.writer.clone().lock_owned().await;
            let _ = writer.shutdown().await;
        }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_ids_are_unique() {
        let (a, _keep_a) = socket_pair().await;
        let (b, _keep_b) = socket_pair().await;
        let peer = a.peer_addr().unwrap();
        let first = Endpoint::new(a, peer);
        let second = Endpoint::new(b, peer);
        assert_ne!(first.id(), second.id());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_signals_peer() {
        let (gateway_side, mut agent_side) = socket_pair().await;
        let peer = gateway_side.peer_addr().unwrap();
        let endpoint = Endpoint::new(gateway_side, peer);

        assert!(!endpoint.is_closed());
        endpoint.close().await;
        endpoint.close().await;
        assert!(endpoint.is_closed());

        // Peer observes EOF after the shutdown.
        let mut buf = [0u8; 1];
        assert_eq!(agent_side.read(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mark_closed_single_winner() {
        let (stream, _keep) = socket_pair().await;
        let peer = stream.peer_addr().unwrap();
        let endpoint = Endpoint::new(stream, peer);
        assert!(endpoint.mark_closed());
        assert!(!endpoint.mark_closed());
    }
}

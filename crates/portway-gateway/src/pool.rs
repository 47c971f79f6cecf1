//! Round-robin endpoint pool for one tunnel.
//!
//! The lock guards only the vector and cursor; all socket I/O happens on
//! the selected endpoint after the lock is released. Selection does not
//! grant exclusive use of an endpoint: concurrent handlers may pick the
//! same one and interleave their exchanges on it, with responses crossing
//! between them. The cursor spreads load so that in practice an endpoint
//! sees one exchange at a time, but nothing enforces that.

use std::sync::Arc;
use std::sync::Mutex;

use tracing::debug;

use crate::endpoint::Endpoint;

#[derive(Default)]
struct PoolInner {
    endpoints: Vec<Arc<Endpoint>>,
    cursor: usize,
}

impl PoolInner {
    fn renormalize(&mut self) {
        if self.endpoints.is_empty() {
            self.cursor = 0;
        } else {
            self.cursor %= self.endpoints.len();
        }
    }
}

/// Set of live endpoints for one tunnel, with a round-robin cursor.
#[derive(Default)]
pub struct Pool {
    inner: Mutex<PoolInner>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an endpoint. Capacity is advisory; attach never refuses.
    pub fn attach(&self, endpoint: Arc<Endpoint>) {
        let mut inner = self.inner.lock().unwrap();
        inner.endpoints.push(endpoint);
        inner.renormalize();
    }

    /// Round-robin selection. `None` when the pool is empty.
    pub fn next(&self) -> Option<Arc<Endpoint>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.endpoints.is_empty() {
            return None;
        }
        let endpoint = inner.endpoints[inner.cursor].clone();
        inner.cursor = (inner.cursor + 1) % inner.endpoints.len();
        Some(endpoint)
    }

    /// Remove an endpoint without closing it, as the upgrade path does
    /// when a socket leaves framed mode. Returns whether it was present.
    pub fn remove(&self, endpoint: &Arc<Endpoint>) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let before = inner.endpoints.len();
        inner.endpoints.retain(|e| e.id() != endpoint.id());
        inner.renormalize();
        before != inner.endpoints.len()
    }

    /// Remove an endpoint and close it. Removing an endpoint that is not
    /// present only re-runs the (idempotent) close.
    pub async fn detach(&self, endpoint: &Arc<Endpoint>) {
        if self.remove(endpoint) {
            debug!(endpoint = endpoint.id(), "detached endpoint");
        }
        endpoint.close().await;
    }

    /// Take every endpoint out of the pool, for tunnel retirement.
    pub fn drain(&self) -> Vec<Arc<Endpoint>> {
        let mut inner = self.inner.lock().unwrap();
        inner.cursor = 0;
        std::mem::take(&mut inner.endpoints)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! JSON shapes shared between the gateway's HTTP surface and the agent.

use serde::{Deserialize, Serialize};

/// Descriptor returned by the gateway when a tunnel is allocated.
///
/// The agent sizes its connection fleet from `max_conn_count` and presents
/// `token` on every tunnel dial-in when `auth_required` is set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelDescriptor {
    pub id: String,
    /// Tunnel port the agent should dial.
    pub port: u16,
    pub max_conn_count: usize,
    /// Public URL for the tunnel; empty when the gateway has no base domain.
    pub url: String,
    pub auth_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// Body of `GET /api/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub tunnels: usize,
    pub auth_enabled: bool,
    pub tunnel_port: u16,
    pub mem: MemStats,
}

/// Process memory snapshot embedded in [`ServerStats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemStats {
    pub alloc: u64,
    #[serde(rename = "totalAlloc")]
    pub total_alloc: u64,
    pub sys: u64,
    #[serde(rename = "heapAlloc")]
    pub heap_alloc: u64,
}

/// Body of `GET /api/tunnels/{id}/status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TunnelStatus {
    pub connected_sockets: usize,
    /// Unix seconds.
    pub created_at: i64,
    /// Unix seconds.
    pub last_access: i64,
}

//! The portway agent.
//!
//! An agent allocates a tunnel over the gateway's HTTP surface, then keeps
//! a fleet of TCP connections to the gateway's tunnel port. Each
//! connection serves one framed HTTP exchange at a time against the local
//! loopback service, or switches to raw byte splicing after a WebSocket
//! upgrade. Dead connections are re-dialed after a fixed one-second delay,
//! forever.

pub mod client;
pub mod config;
pub mod handler;
pub mod supervisor;

pub use client::{parse_server_url, request_tunnel, AgentError, ServerUrl};
pub use config::AgentConfig;
pub use supervisor::Supervisor;

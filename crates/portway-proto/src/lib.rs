//! Shared wire layer for portway.
//!
//! Everything both ends of a tunnel must agree on lives here: the
//! line-oriented handshake spoken on the tunnel port, the framed HTTP/1.1
//! codec used for request/response exchanges over an endpoint, the tunnel
//! descriptor and status JSON shapes, and the tunnel-id rules.

pub mod descriptor;
pub mod handshake;
pub mod http;
pub mod ids;

pub use descriptor::{MemStats, ServerStats, TunnelDescriptor, TunnelStatus};
pub use handshake::{read_handshake_line, write_handshake, TUNNEL_PORT};
pub use http::{read_request, read_response, write_request, write_response, HttpError, Request, Response};
pub use ids::{is_valid_id, random_id};

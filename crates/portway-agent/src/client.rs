//! Tunnel allocation over the gateway's HTTP surface.
//!
//! One short-lived plain-HTTP call using the same codec the tunnel wire
//! speaks; the gateway answers with the descriptor JSON the supervisor is
//! started from.

use thiserror::Error;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::debug;

use portway_proto::http::{read_response, write_request, HttpError, Request};
use portway_proto::TunnelDescriptor;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    #[error("unsupported server URL {0:?}: expected http://host[:port]")]
    UnsupportedUrl(String),

    #[error("gateway returned {status}: {message}")]
    AllocationFailed { status: u16, message: String },

    #[error("malformed tunnel descriptor: {0}")]
    BadDescriptor(String),
}

/// Parsed `http://host[:port]` gateway URL.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerUrl {
    /// Authority as written, for the Host header.
    pub host: String,
    /// `host:port` to dial, port 80 filled in when absent.
    pub authority: String,
}

impl ServerUrl {
    /// Hostname with any port stripped, for dialing the tunnel port.
    pub fn hostname(&self) -> &str {
        self.host.split(':').next().unwrap_or(&self.host)
    }
}

/// Parse a gateway base URL. Only plain http is spoken on the wire.
pub fn parse_server_url(url: &str) -> Result<ServerUrl, AgentError> {
    let rest = url
        .strip_prefix("http://")
        .ok_or_else(|| AgentError::UnsupportedUrl(url.to_string()))?;
    let host = rest.split('/').next().unwrap_or(rest);
    if host.is_empty() {
        return Err(AgentError::UnsupportedUrl(url.to_string()));
    }
    let authority = if host.contains(':') {
        host.to_string()
    } else {
        format!("{host}:80")
    };
    Ok(ServerUrl {
        host: host.to_string(),
        authority,
    })
}

/// Request a tunnel: `/?new` for a random id, `/{subdomain}` for a named
/// one. The API key, when present, travels as a bearer credential.
pub async fn request_tunnel(
    server_url: &str,
    subdomain: Option<&str>,
    api_key: Option<&str>,
) -> Result<TunnelDescriptor, AgentError> {
    let server = parse_server_url(server_url)?;
    let target = match subdomain {
        Some(subdomain) => format!("/{subdomain}"),
        None => "/?new".to_string(),
    };

    debug!(authority = %server.authority, target = %target, "requesting tunnel");

    let mut headers = vec![
        ("Host".to_string(), server.host.clone()),
        ("Connection".to_string(), "close".to_string()),
        ("User-Agent".to_string(), "portway-agent".to_string()),
    ];
    if let Some(key) = api_key.filter(|k| !k.is_empty()) {
        headers.push(("Authorization".to_string(), format!("Bearer {key}")));
    }
    let req = Request {
        method: "GET".to_string(),
        target,
        version: 1,
        headers,
        body: Vec::new(),
    };

    let stream = TcpStream::connect(&server.authority).await?;
    let mut conn = BufReader::new(stream);
    write_request(&mut conn, &req).await?;
    let resp = read_response(&mut conn).await?;

    if resp.status != 200 {
        return Err(AgentError::AllocationFailed {
            status: resp.status,
            message: String::from_utf8_lossy(&resp.body).trim().to_string(),
        });
    }

    serde_json::from_slice(&resp.body).map_err(|e| AgentError::BadDescriptor(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_url() {
        let server = parse_server_url("http://gw.example:8080").unwrap();
        assert_eq!(server.host, "gw.example:8080");
        assert_eq!(server.authority, "gw.example:8080");
        assert_eq!(server.hostname(), "gw.example");

        let server = parse_server_url("http://gw.example").unwrap();
        assert_eq!(server.authority, "gw.example:80");

        let server = parse_server_url("http://localhost:8080/ignored/path").unwrap();
        assert_eq!(server.authority, "localhost:8080");
    }

    #[test]
    fn test_parse_server_url_rejects_other_schemes() {
        assert!(matches!(
            parse_server_url("https://gw.example"),
            Err(AgentError::UnsupportedUrl(_))
        ));
        assert!(matches!(
            parse_server_url("gw.example"),
            Err(AgentError::UnsupportedUrl(_))
        ));
        assert!(matches!(
            parse_server_url("http://"),
            Err(AgentError::UnsupportedUrl(_))
        ));
    }
}

//! Client-IP derivation and allowlist matching with CIDR support.
//!
//! Allowlists accept individual addresses ("192.168.1.100") and CIDR
//! ranges ("10.0.0.0/8"), IPv4 and IPv6. An empty allowlist allows
//! everything.

use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IpAllowlistError {
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("invalid CIDR: {0}")]
    InvalidCidr(String),
}

/// One allowlist entry: a base address plus a prefix length.
#[derive(Debug, Clone, PartialEq)]
struct IpNetwork {
    addr: IpAddr,
    prefix_len: u8,
}

impl IpNetwork {
    fn parse(s: &str) -> Result<Self, IpAllowlistError> {
        if let Some((ip_str, prefix_str)) = s.split_once('/') {
            let addr = IpAddr::from_str(ip_str)
                .map_err(|_| IpAllowlistError::InvalidAddress(s.to_string()))?;
            let prefix_len = prefix_str
                .parse::<u8>()
                .map_err(|_| IpAllowlistError::InvalidCidr(s.to_string()))?;
            let max_prefix = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            if prefix_len > max_prefix {
                return Err(IpAllowlistError::InvalidCidr(s.to_string()));
            }
            Ok(Self { addr, prefix_len })
        } else {
            let addr =
                IpAddr::from_str(s).map_err(|_| IpAllowlistError::InvalidAddress(s.to_string()))?;
            let prefix_len = match addr {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            Ok(Self { addr, prefix_len })
        }
    }

    fn contains(&self, addr: &IpAddr) -> bool {
        match (self.addr, addr) {
            (IpAddr::V4(net), IpAddr::V4(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - self.prefix_len as u32)
                };
                (u32::from(net) & mask) == (u32::from(*ip) & mask)
            }
            (IpAddr::V6(net), IpAddr::V6(ip)) => {
                let mask = if self.prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - self.prefix_len as u32)
                };
                (u128::from(net) & mask) == (u128::from(*ip) & mask)
            }
            _ => false,
        }
    }
}

/// IP allowlist; empty means allow-all.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IpAllowlist {
    networks: Vec<IpNetwork>,
}

impl IpAllowlist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a list of addresses and CIDR ranges.
    pub fn from_entries<S: AsRef<str>>(entries: &[S]) -> Result<Self, IpAllowlistError> {
        let networks = entries
            .iter()
            .map(|e| IpNetwork::parse(e.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { networks })
    }

    pub fn is_empty(&self) -> bool {
        self.networks.is_empty()
    }

    /// Whether `ip` is allowed. Unparseable input only passes an empty list.
    pub fn allows(&self, ip: &str) -> bool {
        if self.networks.is_empty() {
            return true;
        }
        let Ok(addr) = IpAddr::from_str(ip) else {
            return false;
        };
        self.networks.iter().any(|n| n.contains(&addr))
    }
}

/// Reduce an address string to a bare IP: parse as-is, then as host:port,
/// then give up and return the input.
pub fn extract_ip(addr: &str) -> String {
    if let Ok(ip) = IpAddr::from_str(addr) {
        return ip.to_string();
    }
    if let Ok(sock) = SocketAddr::from_str(addr) {
        return sock.ip().to_string();
    }
    if let Some((host, _port)) = addr.rsplit_once(':') {
        return host.to_string();
    }
    addr.to_string()
}

/// Derive the caller IP the way the gateway reports it everywhere:
/// `X-Real-IP` wins, then the first element of `X-Forwarded-For`, then the
/// connection's remote address.
pub fn client_ip(remote_addr: &str, x_forwarded_for: Option<&str>, x_real_ip: Option<&str>) -> String {
    if let Some(real) = x_real_ip.filter(|v| !v.is_empty()) {
        return extract_ip(real.trim());
    }
    if let Some(forwarded) = x_forwarded_for.filter(|v| !v.is_empty()) {
        let first = forwarded.split(',').next().unwrap_or(forwarded);
        return extract_ip(first.trim());
    }
    extract_ip(remote_addr)
}

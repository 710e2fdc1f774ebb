//! Socket endpoint addresses

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};

/// Host name and port together with the resolved endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketAddress {
    host: String,
    port: u16,
    resolved: Option<SocketAddr>,
}

impl SocketAddress {
    /// Resolve `host:port`; the result is invalid when resolution fails
    pub fn new(host: &str, port: u16) -> Self {
        let mut address = Self::default();
        address.resolve(host, port);
        address
    }

    pub fn from_socket_addr(addr: SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
            resolved: Some(addr),
        }
    }

    /// Resolve a host name or literal address, preferring IPv4.
    /// Returns `false` and leaves the address invalid on failure.
    pub fn resolve(&mut self, host: &str, port: u16) -> bool {
        self.host = host.to_string();
        self.port = port;
        self.resolved = match (host, port).to_socket_addrs() {
            Ok(addrs) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                addrs
                    .iter()
                    .find(|addr| addr.is_ipv4())
                    .or_else(|| addrs.first())
                    .copied()
            }
            Err(e) => {
                tracing::warn!("Failed to resolve {}:{}: {}", host, port, e);
                None
            }
        };
        self.resolved.is_some()
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.resolved
    }

    pub fn is_valid(&self) -> bool {
        self.resolved.is_some()
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.resolved {
            Some(addr) => write!(f, "{addr}"),
            None => write!(f, "{}:{} (unresolved)", self.host, self.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_literal_address() {
        let address = SocketAddress::new("127.0.0.1", 8181);
        assert!(address.is_valid());
        assert_eq!(address.port(), 8181);
        assert_eq!(address.to_string(), "127.0.0.1:8181");
    }

    #[test]
    fn test_unresolvable_host_is_invalid() {
        let mut address = SocketAddress::default();
        assert!(!address.resolve("no-such-host.invalid", 80));
        assert!(!address.is_valid());
        assert_eq!(address.host(), "no-such-host.invalid");
    }
}

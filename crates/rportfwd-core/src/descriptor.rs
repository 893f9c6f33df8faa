//! Forward descriptors and request parsing.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use tokio::net::lookup_host;

use crate::config::ForwardConfig;
use crate::error::{Error, Result};

/// An unresolved forward, as supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardRequest {
    /// Local port to listen on.
    pub bind_port: u16,
    /// Target host name or IP literal.
    pub forward_address: String,
    /// Target port.
    pub forward_port: u16,
}

impl ForwardRequest {
    /// Parse the textual form used by the command layer.
    pub fn parse(bind_port: &str, forward_address: &str, forward_port: &str) -> Result<Self> {
        let forward_address = forward_address.trim();
        if forward_address.is_empty() {
            return Err(Error::AddressResolution("empty forward address".into()));
        }

        Ok(Self {
            bind_port: parse_port(bind_port)?,
            forward_address: forward_address.to_string(),
            forward_port: parse_port(forward_port)?,
        })
    }
}

impl From<ForwardConfig> for ForwardRequest {
    fn from(config: ForwardConfig) -> Self {
        Self {
            bind_port: config.bind_port,
            forward_address: config.forward_address,
            forward_port: config.forward_port,
        }
    }
}

/// Parse a decimal port, rejecting zero.
pub fn parse_port(text: &str) -> Result<u16> {
    match text.trim().parse::<u16>() {
        Ok(port) if port != 0 => Ok(port),
        _ => Err(Error::InvalidPort(text.to_string())),
    }
}

/// Resolve a forward address to a single IP.
///
/// IP literals are taken as-is; anything else goes through DNS and the
/// first answer wins.
pub async fn resolve_forward_address(address: &str) -> Result<IpAddr> {
    if let Ok(ip) = address.parse::<IpAddr>() {
        return Ok(ip);
    }

    let mut addrs = lookup_host((address, 0))
        .await
        .map_err(|e| Error::AddressResolution(format!("{}: {}", address, e)))?;

    addrs
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| Error::AddressResolution(format!("{}: no addresses", address)))
}

/// An active forward. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardDescriptor {
    bind_addresses: Vec<IpAddr>,
    bind_port: u16,
    forward_address: IpAddr,
    forward_port: u16,
}

impl ForwardDescriptor {
    pub fn new(
        bind_addresses: Vec<IpAddr>,
        bind_port: u16,
        forward_address: IpAddr,
        forward_port: u16,
    ) -> Self {
        Self {
            bind_addresses,
            bind_port,
            forward_address,
            forward_port,
        }
    }

    pub fn bind_addresses(&self) -> &[IpAddr] {
        &self.bind_addresses
    }

    pub fn bind_port(&self) -> u16 {
        self.bind_port
    }

    pub fn forward_address(&self) -> IpAddr {
        self.forward_address
    }

    pub fn forward_port(&self) -> u16 {
        self.forward_port
    }

    /// Socket address of the forward target.
    pub fn target(&self) -> SocketAddr {
        SocketAddr::new(self.forward_address, self.forward_port)
    }

    /// Read-only projection reported by `list`.
    pub fn info(&self) -> ForwardInfo {
        ForwardInfo {
            bind_addresses: self
                .bind_addresses
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
            bind_port: self.bind_port,
            forward_address: self.forward_address.to_string(),
            forward_port: self.forward_port,
        }
    }
}

/// Snapshot record for one forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardInfo {
    /// Comma-separated bind addresses.
    pub bind_addresses: String,

    /// Local port.
    pub bind_port: u16,

    /// Resolved target address.
    pub forward_address: String,

    /// Target port.
    pub forward_port: u16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn parse_accepts_decimal_ports() {
        let request = ForwardRequest::parse("9000", "127.0.0.1", " 8000 ").unwrap();
        assert_eq!(request.bind_port, 9000);
        assert_eq!(request.forward_address, "127.0.0.1");
        assert_eq!(request.forward_port, 8000);
    }

    #[test]
    fn parse_rejects_bad_ports() {
        for port in ["", "abc", "-1", "65536", "0", "80a"] {
            assert!(
                matches!(parse_port(port), Err(Error::InvalidPort(_))),
                "accepted {port:?}"
            );
        }
        assert!(matches!(
            ForwardRequest::parse("9000", "localhost", "http"),
            Err(Error::InvalidPort(_))
        ));
    }

    #[test]
    fn parse_rejects_blank_address() {
        assert!(matches!(
            ForwardRequest::parse("9000", "  ", "80"),
            Err(Error::AddressResolution(_))
        ));
    }

    #[tokio::test]
    async fn literal_addresses_skip_dns() {
        assert_eq!(
            resolve_forward_address("10.1.2.3").await.unwrap(),
            IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3))
        );
        assert_eq!(
            resolve_forward_address("::1").await.unwrap(),
            IpAddr::V6(Ipv6Addr::LOCALHOST)
        );
    }

    #[tokio::test]
    async fn localhost_resolves_to_loopback() {
        let ip = resolve_forward_address("localhost").await.unwrap();
        assert!(ip.is_loopback());
    }

    #[tokio::test]
    async fn unresolvable_host_fails() {
        let result = resolve_forward_address("no-such-host.invalid").await;
        assert!(matches!(result, Err(Error::AddressResolution(_))));
    }

    #[test]
    fn info_joins_bind_addresses() {
        let descriptor = ForwardDescriptor::new(
            vec![
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            9000,
            IpAddr::V4(Ipv4Addr::new(192, 168, 1, 5)),
            22,
        );

        assert_eq!(
            descriptor.info(),
            ForwardInfo {
                bind_addresses: "127.0.0.1,::1".into(),
                bind_port: 9000,
                forward_address: "192.168.1.5".into(),
                forward_port: 22,
            }
        );
        assert_eq!(descriptor.target(), "192.168.1.5:22".parse().unwrap());
    }
}

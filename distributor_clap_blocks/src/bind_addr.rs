//! Config for the address a listener binds to.
use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs},
    ops::Deref,
    str::FromStr,
};

/// Address to bind a listener to.
///
/// Accepts a literal socket address (`127.0.0.1:3334`, `[::1]:3334`), a host name with a port
/// (`localhost:3334`) or just a port (`:3334` or `3334`), which binds all IPv4 interfaces.
/// A host name resolving to several addresses binds the first IPv4 one, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindAddress(SocketAddr);

impl BindAddress {
    /// Bind all IPv4 interfaces on `port`
    pub fn any(port: u16) -> Self {
        Self(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port))
    }

    fn resolve(host_port: &str) -> Result<Self, String> {
        let addrs: Vec<SocketAddr> = host_port
            .to_socket_addrs()
            .map_err(|e| format!("invalid bind address '{host_port}': {e}"))?
            .collect();
        addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .map(|addr| Self(*addr))
            .ok_or_else(|| format!("bind address '{host_port}' resolves to nothing"))
    }
}

impl Deref for BindAddress {
    type Target = SocketAddr;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl std::fmt::Display for BindAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BindAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(addr) = SocketAddr::from_str(s) {
            return Ok(Self(addr));
        }

        let port = s.strip_prefix(':').unwrap_or(s);
        if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) {
            return port
                .parse()
                .map(Self::any)
                .map_err(|_| format!("invalid port in bind address '{s}'"));
        }

        Self::resolve(s)
    }
}

impl From<BindAddress> for SocketAddr {
    fn from(addr: BindAddress) -> Self {
        addr.0
    }
}

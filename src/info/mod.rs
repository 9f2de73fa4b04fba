//! Connection and endpoint information

use std::fmt;

/// The remote endpoint a pool connects to.
///
/// Host and port are kept as the strings they were configured with, and are handed
/// to the [`Dialer`](crate::client::conn::Dialer) unchanged. Resolving the host is the
/// dialer's concern.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Endpoint {
    host: String,
    port: String,
}

impl Endpoint {
    /// Create an endpoint from a host and port.
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: port.into(),
        }
    }

    /// The configured host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The configured port.
    pub fn port(&self) -> &str {
        &self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Information about the addresses a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo<Addr> {
    /// The local address for this connection.
    pub local_addr: Addr,

    /// The remote address for this connection.
    pub remote_addr: Addr,
}

impl<Addr> Default for ConnectionInfo<Addr>
where
    Addr: Default,
{
    fn default() -> Self {
        Self {
            local_addr: Addr::default(),
            remote_addr: Addr::default(),
        }
    }
}

impl<Addr> ConnectionInfo<Addr> {
    /// The local address for this connection
    pub fn local_addr(&self) -> &Addr {
        &self.local_addr
    }

    /// The remote address for this connection
    pub fn remote_addr(&self) -> &Addr {
        &self.remote_addr
    }
}

/// Trait for connections which can report the addresses they are bound to.
pub trait HasConnectionInfo {
    /// The address type for this connection.
    type Addr: fmt::Display + fmt::Debug + Send;

    /// Get the connection information for this connection.
    fn info(&self) -> ConnectionInfo<Self::Addr>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_display() {
        assert_eq!(Endpoint::new("example.com", "9090").to_string(), "example.com:9090");
        assert_eq!(Endpoint::new("::1", "9090").to_string(), "[::1]:9090");
        assert_eq!(Endpoint::new("[::1]", "9090").to_string(), "[::1]:9090");
    }

    #[test]
    fn endpoint_parts() {
        let endpoint = Endpoint::new("10.0.0.1", "6000");
        assert_eq!(endpoint.host(), "10.0.0.1");
        assert_eq!(endpoint.port(), "6000");
    }
}

//! Host/port pairs for the listener and the backend.
//!
//! The host must be an IP literal: names are not resolved here, so
//! `a.b.c.d` or `localhost` are rejected just like `256.220.30.1`.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Highest valid TCP port.
pub const MAX_PORT: u32 = 65_535;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid port number: {0}")]
    InvalidPort(u32),

    #[error("invalid ip address: {0}")]
    InvalidIp(String),
}

/// Host and port as configured.
///
/// The port is wider than `u16` so that out-of-range values coming from
/// configuration survive until validation and can be reported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ServerInfo {
    pub host: String,
    pub port: u32,
}

impl ServerInfo {
    /// Unvalidated address; see [`ServerInfo::validate`].
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Check the pair and produce a socket address.
    pub fn validate(&self) -> Result<SocketAddr, AddressError> {
        let port = u16::try_from(self.port).map_err(|_| AddressError::InvalidPort(self.port))?;

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|_| AddressError::InvalidIp(self.host.clone()))?;

        Ok(SocketAddr::new(ip, port))
    }

    /// Validated `host:port` string, bracketing IPv6 hosts.
    pub fn validated_target(&self) -> Result<String, AddressError> {
        self.validate().map(|addr| addr.to_string())
    }
}

impl fmt::Display for ServerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unacceptable_addresses() {
        let values = [
            ServerInfo::new("256.220.30.1", 80),
            ServerInfo::new("a.b.c.d", 80),
            ServerInfo::new("0::xdsa", 80),
            ServerInfo::new("0::0", 65_536),
            ServerInfo::new("", 8080),
        ];

        for value in values {
            assert!(value.validate().is_err(), "accepted {value:?}");
        }
    }

    #[test]
    fn port_checked_before_host() {
        let err = ServerInfo::new("a.b.c.d", 70_000).validate().unwrap_err();
        assert_eq!(err, AddressError::InvalidPort(70_000));
    }

    #[test]
    fn accepts_ip_literals() {
        let addr = ServerInfo::new("127.0.0.1", 8080).validate().unwrap();
        assert_eq!(addr, "127.0.0.1:8080".parse::<SocketAddr>().unwrap());

        assert!(ServerInfo::new("0.0.0.0", 0).validate().is_ok());
        assert!(ServerInfo::new("0.0.0.0", 65_535).validate().is_ok());
    }

    #[test]
    fn ipv6_target_is_bracketed() {
        let target = ServerInfo::new("::1", 9000).validated_target().unwrap();
        assert_eq!(target, "[::1]:9000");
    }
}

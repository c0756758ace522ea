// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Newtype wrappers for validated inputs.
//!
//! Following the "Newtype" pattern in Rust to ensure valid state by construction.
//! All types validate their invariants at creation time.

use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::HardValidationError;

/// Maximum length of a worker identity.
const MAX_WORKER_ID_LEN: usize = 64;

/// Validated worker identity.
/// Must be non-empty, alphanumeric with hyphens/underscores/dots, max 64 chars.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct WorkerId(String);

impl WorkerId {
    /// Create a new WorkerId with validation.
    pub fn new(id: impl Into<String>) -> Result<Self, HardValidationError> {
        let id = id.into();

        if id.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "worker_id",
                value: id,
                reason: "Worker ID cannot be empty".to_string(),
            });
        }

        if id.len() > MAX_WORKER_ID_LEN {
            return Err(HardValidationError::InvalidFieldValue {
                field: "worker_id",
                value: id.clone(),
                reason: format!(
                    "Worker ID too long: {} chars (max {})",
                    id.len(),
                    MAX_WORKER_ID_LEN
                ),
            });
        }

        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(HardValidationError::InvalidFieldValue {
                field: "worker_id",
                value: id,
                reason: "Worker ID must contain only alphanumeric characters, hyphens, underscores, and dots".to_string(),
            });
        }

        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WorkerId {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<WorkerId> for String {
    fn from(id: WorkerId) -> Self {
        id.0
    }
}

/// Validated network port.
/// Must be in range 1-65535 (0 is reserved).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct Port(u16);

impl Port {
    /// Create a new Port with validation.
    pub fn new(port: u16) -> Result<Self, HardValidationError> {
        if port == 0 {
            return Err(HardValidationError::InvalidPort {
                port,
                reason: "Port 0 is reserved and cannot be used".to_string(),
            });
        }
        Ok(Self(port))
    }

    /// Get the inner port value.
    pub fn value(&self) -> u16 {
        self.0
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u16> for Port {
    type Error = HardValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Port> for u16 {
    fn from(port: Port) -> Self {
        port.0
    }
}

/// Network address of a worker or master.
///
/// Parsed from `host:port`; bracketed IPv6 hosts (`[::1]:8090`) are accepted.
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Endpoint {
    host: String,
    port: Port,
}

impl Endpoint {
    /// Create an endpoint from a host and a validated port.
    pub fn new(host: impl Into<String>, port: Port) -> Result<Self, HardValidationError> {
        let host = host.into();
        if host.is_empty() {
            return Err(HardValidationError::InvalidFieldValue {
                field: "endpoint",
                value: format!(":{}", port),
                reason: "Host cannot be empty".to_string(),
            });
        }
        Ok(Self { host, port })
    }

    /// Build an endpoint from a concrete socket address.
    pub fn from_socket_addr(addr: SocketAddr) -> Result<Self, HardValidationError> {
        Self::new(addr.ip().to_string(), Port::new(addr.port())?)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> Port {
        self.port
    }

    /// Resolve to a socket address, preferring IPv4 results.
    ///
    /// `localhost` commonly resolves to `::1` first, which an IPv4-bound
    /// datagram socket cannot reach.
    pub fn resolve(&self) -> std::io::Result<SocketAddr> {
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port.value())
            .to_socket_addrs()?
            .collect();

        addrs
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no address found for {}", self),
                )
            })
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = HardValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| HardValidationError::InvalidFieldValue {
            field: "endpoint",
            value: s.to_string(),
            reason: reason.to_string(),
        };

        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| invalid("Expected host:port"))?;

        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);

        let port: u16 = port
            .parse()
            .map_err(|_| invalid("Port must be an integer in 1-65535"))?;

        Self::new(host, Port::new(port)?)
    }
}

impl TryFrom<String> for Endpoint {
    type Error = HardValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Endpoint> for String {
    fn from(endpoint: Endpoint) -> Self {
        endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_id_valid() {
        assert!(WorkerId::new("worker-0").is_ok());
        assert!(WorkerId::new("val04.w_1").is_ok());
    }

    #[test]
    fn test_worker_id_invalid() {
        assert!(WorkerId::new("").is_err());
        assert!(WorkerId::new("a".repeat(65)).is_err());
        assert!(WorkerId::new("worker 1").is_err());
        assert!(WorkerId::new("w@host").is_err());
    }

    #[test]
    fn test_port_invalid() {
        assert!(Port::new(0).is_err());
        assert!(Port::new(8090).is_ok());
    }

    #[test]
    fn test_endpoint_parse() {
        let ep: Endpoint = "val04:8000".parse().unwrap();
        assert_eq!(ep.host(), "val04");
        assert_eq!(ep.port().value(), 8000);
        assert_eq!(ep.to_string(), "val04:8000");
    }

    #[test]
    fn test_endpoint_parse_ipv6() {
        let ep: Endpoint = "[::1]:7000".parse().unwrap();
        assert_eq!(ep.host(), "::1");
        assert_eq!(ep.to_string(), "[::1]:7000");
    }

    #[test]
    fn test_endpoint_parse_invalid() {
        assert!("no-port".parse::<Endpoint>().is_err());
        assert!("host:0".parse::<Endpoint>().is_err());
        assert!("host:99999".parse::<Endpoint>().is_err());
        assert!(":8000".parse::<Endpoint>().is_err());
    }

    #[test]
    fn test_endpoint_resolve_prefers_ipv4() {
        let ep: Endpoint = "localhost:8000".parse().unwrap();
        let addr = ep.resolve().unwrap();
        assert_eq!(addr.port(), 8000);
        assert!(addr.ip().is_loopback());
    }

    #[test]
    fn test_endpoint_serde() {
        let ep: Endpoint = serde_yaml::from_str("\"127.0.0.1:8090\"").unwrap();
        assert_eq!(ep.port().value(), 8090);
    }
}

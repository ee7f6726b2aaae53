//! Remote endpoint identifier.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::error::RelayError;

/// An RPC endpoint: address plus port.
///
/// Hosts are plain values used as keys by the health gate and the session
/// pool. They display and parse as `ip:port`; the port is split off at the
/// last `:` so bracketed IPv6 literals (`[::1]:9000`) round-trip.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,
    pub port: u16,
}

impl Host {
    pub fn new(ip: impl Into<String>, port: u16) -> Self {
        Self {
            ip: ip.into(),
            port,
        }
    }

    /// Socket address string suitable for `TcpStream::connect`.
    pub fn addr(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

impl FromStr for Host {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (ip, port) = s
            .rsplit_once(':')
            .ok_or_else(|| RelayError::InvalidHost(s.to_string()))?;
        if ip.is_empty() {
            return Err(RelayError::InvalidHost(s.to_string()));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| RelayError::InvalidHost(s.to_string()))?;
        Ok(Host::new(ip, port))
    }
}

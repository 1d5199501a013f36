//! Remote connection endpoint.

use std::fmt;
use std::str::FromStr;

use crate::error::TransportError;

/// Host and port of the remote peer. Immutable once constructed; a channel
/// to a different peer needs a new endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self, TransportError> {
        let host = host.into();
        let trimmed = host.trim_start_matches('[').trim_end_matches(']');
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(TransportError::InvalidEndpoint(format!(
                "invalid host {host:?}"
            )));
        }
        if port == 0 {
            return Err(TransportError::InvalidEndpoint(format!(
                "port must be non-zero for host {trimmed}"
            )));
        }
        Ok(Self {
            host: trimmed.to_string(),
            port,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, with IPv6 literals bracketed, suitable for `TcpStream::connect`.
    pub fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.authority())
    }
}

impl FromStr for Endpoint {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("missing port in {s:?}")))?;
        let port = port
            .parse::<u16>()
            .map_err(|_| TransportError::InvalidEndpoint(format!("invalid port in {s:?}")))?;
        Self::new(host, port)
    }
}

impl From<std::net::SocketAddr> for Endpoint {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self {
            host: addr.ip().to_string(),
            port: addr.port(),
        }
    }
}

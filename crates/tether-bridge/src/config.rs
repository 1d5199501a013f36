//! TOML-based configuration for the bridge.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use tether_transport::Endpoint;

use crate::client::ClientOptions;
use crate::error::BridgeError;
use crate::identity::Identity;

/// Top-level bridge configuration loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub remote: RemoteSection,
    #[serde(default)]
    pub identity: IdentitySection,
    #[serde(default)]
    pub listen: ListenSection,
    #[serde(default)]
    pub outbound: OutboundSection,
    #[serde(default)]
    pub events: EventsSection,
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

impl BridgeConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, BridgeError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| BridgeError::Config(format!("failed to read config file: {e}")))?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, BridgeError> {
        toml::from_str(s).map_err(|e| BridgeError::Config(format!("failed to parse config: {e}")))
    }

    pub fn endpoint(&self) -> Result<Endpoint, BridgeError> {
        Endpoint::new(self.remote.host.as_str(), self.remote.port)
            .map_err(|e| BridgeError::Config(e.to_string()))
    }

    /// The passive event service bind address, if one is configured.
    pub fn server_bind(&self) -> Result<Option<SocketAddr>, BridgeError> {
        self.server.bind.as_deref().map(parse_socket_addr).transpose()
    }

    /// Options for a [`BridgeClient`](crate::client::BridgeClient).
    pub fn client_options(&self) -> Result<ClientOptions, BridgeError> {
        if self.remote.connect_timeout_ms == 0 {
            return Err(BridgeError::Config(
                "remote.connect_timeout_ms must be non-zero".into(),
            ));
        }
        if self.outbound.capacity == 0 {
            return Err(BridgeError::Config(
                "outbound.capacity must be non-zero".into(),
            ));
        }

        let identity = Identity::new(self.identity.uin, self.identity.uid.as_str())
            .with_version(self.identity.version.as_str());

        Ok(ClientOptions {
            endpoint: self.endpoint()?,
            identity,
            connect_timeout: Duration::from_millis(self.remote.connect_timeout_ms),
            transport_retries: self.remote.transport_retries,
            transport_retry_delay: Duration::from_millis(self.remote.transport_retry_delay_ms),
            backoff: Duration::from_millis(self.listen.backoff_ms),
            outbound_capacity: self.outbound.capacity,
            event_route: self.events.route,
        })
    }
}

/// The `[remote]` section: where the controller lives.
#[derive(Debug, Deserialize)]
pub struct RemoteSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Extra connection attempts made by the transport. 0 disables transport retry.
    #[serde(default = "default_transport_retries")]
    pub transport_retries: u32,
    #[serde(default = "default_transport_retry_delay_ms")]
    pub transport_retry_delay_ms: u64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5700
}

fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_transport_retries() -> u32 {
    3
}

fn default_transport_retry_delay_ms() -> u64 {
    200
}

impl Default for RemoteSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connect_timeout_ms: default_connect_timeout_ms(),
            transport_retries: default_transport_retries(),
            transport_retry_delay_ms: default_transport_retry_delay_ms(),
        }
    }
}

/// The `[identity]` section.
#[derive(Debug, Deserialize)]
pub struct IdentitySection {
    #[serde(default)]
    pub uin: u64,
    #[serde(default)]
    pub uid: String,
    #[serde(default = "default_version")]
    pub version: String,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            uin: 0,
            uid: String::new(),
            version: default_version(),
        }
    }
}

/// The `[listen]` section.
#[derive(Debug, Deserialize)]
pub struct ListenSection {
    /// Reconnects after the first attempt. Negative means unbounded.
    #[serde(default = "default_retry_count")]
    pub retry_count: i32,
    /// Fixed pause between duplex stream attempts.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_retry_count() -> i32 {
    -1
}

fn default_backoff_ms() -> u64 {
    15_000
}

impl Default for ListenSection {
    fn default() -> Self {
        Self {
            retry_count: default_retry_count(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

/// The `[outbound]` section.
#[derive(Debug, Deserialize)]
pub struct OutboundSection {
    #[serde(default = "default_outbound_capacity")]
    pub capacity: usize,
}

fn default_outbound_capacity() -> usize {
    1024
}

impl Default for OutboundSection {
    fn default() -> Self {
        Self {
            capacity: default_outbound_capacity(),
        }
    }
}

/// How events reach the controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventRoute {
    /// One active registration call per category.
    #[default]
    Registration,
    /// Events share the duplex call with responses.
    Duplex,
}

/// The `[events]` section.
#[derive(Debug, Default, Deserialize)]
pub struct EventsSection {
    #[serde(default)]
    pub route: EventRoute,
}

/// The `[server]` section: optional passive event service.
#[derive(Debug, Default, Deserialize)]
pub struct ServerSection {
    pub bind: Option<String>,
}

/// The `[logging]` section.
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Parse a socket address string like "0.0.0.0:5701".
pub fn parse_socket_addr(s: &str) -> Result<SocketAddr, BridgeError> {
    s.parse()
        .map_err(|e| BridgeError::Config(format!("invalid socket address '{s}': {e}")))
}

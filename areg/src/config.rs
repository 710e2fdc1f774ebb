//! Router connection settings

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::socket::MAXIMUM_LISTEN_QUEUE_SIZE;
use crate::{Error, Result};

pub const DEFAULT_ROUTER_HOST: &str = "127.0.0.1";
pub const DEFAULT_ROUTER_PORT: u16 = 8181;

/// Endpoint and timing of the message router, shared by the router itself
/// and the processes connecting to it.
///
/// ```
/// use areg::RemoteConfig;
///
/// let config = RemoteConfig::from_json_str(r#"{ "port": 9000 }"#).unwrap();
/// assert_eq!(config.port, 9000);
/// assert_eq!(config.host, "127.0.0.1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub host: String,
    pub port: u16,
    /// Pending-connection queue of the router socket
    pub listen_queue: i32,
    /// Processes the router serves at once
    pub max_connections: u32,
    /// Readiness scan interval of the router loop
    pub poll_interval_ms: u64,
    /// Delay between reconnect attempts of a process
    pub reconnect_interval_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_ROUTER_HOST.to_string(),
            port: DEFAULT_ROUTER_PORT,
            listen_queue: MAXIMUM_LISTEN_QUEUE_SIZE,
            max_connections: 64,
            poll_interval_ms: 5,
            reconnect_interval_ms: 500,
        }
    }
}

impl RemoteConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self::default().with_endpoint(host, port)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::configuration(format!("invalid router configuration: {e}"), None))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration(
                format!("cannot read {}: {e}", path.display()),
                Some("path".to_string()),
            )
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_endpoint(mut self, host: &str, port: u16) -> Self {
        self.host = host.to_string();
        self.port = port;
        self
    }

    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(Error::configuration(
                "router host must not be empty",
                Some("host".to_string()),
            ));
        }
        if self.max_connections == 0 {
            return Err(Error::configuration(
                "router must accept at least one connection",
                Some("max_connections".to_string()),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(Error::configuration(
                "poll interval must be positive",
                Some("poll_interval_ms".to_string()),
            ));
        }
        if self.reconnect_interval_ms == 0 {
            return Err(Error::configuration(
                "reconnect interval must be positive",
                Some("reconnect_interval_ms".to_string()),
            ));
        }
        Ok(())
    }
}

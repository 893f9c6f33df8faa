//! Configuration structures for rportfwd.

use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Relay engine configuration.
    #[serde(default)]
    pub relay: RelayConfig,

    /// Forwards started when the host comes up.
    #[serde(default)]
    pub forwards: Vec<ForwardConfig>,
}

impl Config {
    /// Parse a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check values that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        self.relay.validate()
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (optional).
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// How an accepted connection is relayed to the forward target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelayMode {
    /// One bounded read from the client, one bounded reply from the target.
    #[default]
    SingleExchange,
    /// Copy bytes both ways until either side closes.
    Stream,
}

/// Relay engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Local addresses every forward listens on.
    #[serde(default = "default_bind_addresses")]
    pub bind_addresses: Vec<IpAddr>,

    /// Pending connection queue length per listener.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Maximum bytes read from a client per exchange.
    #[serde(default = "default_inbound_buffer")]
    pub inbound_buffer: usize,

    /// Maximum bytes read from the target per exchange.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Relay mode.
    #[serde(default)]
    pub mode: RelayMode,

    /// Outbound connect timeout in seconds. Unbounded when absent.
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_addresses: default_bind_addresses(),
            backlog: default_backlog(),
            inbound_buffer: default_inbound_buffer(),
            outbound_buffer: default_outbound_buffer(),
            mode: RelayMode::default(),
            connect_timeout_secs: None,
        }
    }
}

impl RelayConfig {
    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.bind_addresses.is_empty() {
            return Err(Error::Config("relay.bind_addresses is empty".into()));
        }
        if self.backlog == 0 {
            return Err(Error::Config("relay.backlog must be positive".into()));
        }
        if self.inbound_buffer == 0 || self.outbound_buffer == 0 {
            return Err(Error::Config("relay buffers must be non-empty".into()));
        }
        Ok(())
    }
}

fn default_bind_addresses() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::UNSPECIFIED)]
}

fn default_backlog() -> u32 {
    10
}

fn default_inbound_buffer() -> usize {
    1024
}

fn default_outbound_buffer() -> usize {
    1024 * 1024
}

/// A forward declared in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForwardConfig {
    /// Local port to listen on.
    pub bind_port: u16,

    /// Target host name or IP literal.
    pub forward_address: String,

    /// Target port.
    pub forward_port: u16,
}

//! # Bridge configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file is valid.
//!
//! ```toml
//! call_timeout_ms = 30000
//! ping_timeout_ms = 3000
//! min_search_len = 3
//! log_filter = "weaverun=debug,info"
//! storage_path = "/var/lib/weave/storage.json"
//! ```

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug)]
pub enum ConfigError {
    /// Failed to read the config file.
    Io(std::io::Error),
    /// Failed to parse TOML.
    Parse(toml::de::Error),
    /// A value is out of range.
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Failed to read config file: {}", e),
            Self::Parse(e) => write!(f, "Failed to parse config: {}", e),
            Self::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Parse(e) => Some(e),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables shared by the host router, the guest shim and the peer-host selector.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    /// Upper bound on how long a guest waits for any single reply.
    pub call_timeout_ms: u64,
    /// Upper bound on a single peer-host ping.
    pub ping_timeout_ms: u64,
    /// Search filters shorter than this never leave the guest.
    pub min_search_len: usize,
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Where guest-scoped storage is persisted. In-memory only when unset.
    pub storage_path: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            ping_timeout_ms: 3_000,
            min_search_len: 3,
            log_filter: "info".to_string(),
            storage_path: None,
        }
    }
}

impl BridgeConfig {
    /// Parse a config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        let config: BridgeConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(ConfigError::Invalid("call_timeout_ms must be greater than zero".into()));
        }
        if self.ping_timeout_ms == 0 {
            return Err(ConfigError::Invalid("ping_timeout_ms must be greater than zero".into()));
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

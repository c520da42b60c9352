//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::{Error, Result};

/// Default upper bound on a single DAP message body
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Log sink settings
    #[serde(default)]
    pub log: LogConfig,

    /// Wire protocol settings
    #[serde(default)]
    pub protocol: ProtocolConfig,
}

/// Log sink settings
#[derive(Debug, Deserialize, Default)]
pub struct LogConfig {
    /// Log file path; defaults to the platform data directory
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default)]
    pub filter: Option<String>,
}

/// Wire protocol settings
#[derive(Debug, Deserialize)]
pub struct ProtocolConfig {
    /// Largest accepted Content-Length, in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))?;
        if config.protocol.max_message_size == 0 {
            return Err(Error::Config(
                "protocol.max_message_size must be greater than zero".to_string(),
            ));
        }
        Ok(config)
    }
}

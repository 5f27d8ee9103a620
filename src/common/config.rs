//! Configuration for minidfs components
//!
//! Values come from, in increasing priority: an optional TOML file,
//! `MINIDFS__*` environment variables, then command-line flags (applied by
//! the binaries).

use crate::common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "minidfs.toml";

/// Global configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Coordinator-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coordinator: Option<CoordinatorConfig>,

    /// Volume-specific config
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<VolumeConfig>,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            coordinator: None,
            volume: None,
            log_level: default_log_level(),
        }
    }
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bind address for client connections
    #[serde(default = "default_coord_bind")]
    pub bind_addr: SocketAddr,

    /// Storage node addresses queried at startup
    #[serde(default)]
    pub storage_nodes: Vec<String>,
}

fn default_coord_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8080))
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_coord_bind(),
            storage_nodes: Vec::new(),
        }
    }
}

/// Volume (storage node) configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Bind address for coordinator and client connections
    #[serde(default = "default_volume_bind")]
    pub bind_addr: SocketAddr,

    /// Directory holding the stored files
    #[serde(default = "default_data_path")]
    pub data_path: PathBuf,

    /// Total bytes this node may hold
    #[serde(default)]
    pub capacity_bytes: i64,
}

fn default_volume_bind() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8081))
}

fn default_data_path() -> PathBuf {
    PathBuf::from("./volume-data")
}

impl Default for VolumeConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_volume_bind(),
            data_path: default_data_path(),
            capacity_bytes: 0,
        }
    }
}

impl VolumeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity_bytes < 0 {
            return Err(Error::InvalidConfig(format!(
                "capacity must be non-negative, got {}",
                self.capacity_bytes
            )));
        }
        if self.data_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("data path cannot be empty".into()));
        }
        Ok(())
    }
}

impl Config {
    /// Load from `minidfs.toml` (if present) and the environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load from an explicit file (required when given) and the environment
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => config::File::from(path).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("MINIDFS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("coordinator.storage_nodes"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}

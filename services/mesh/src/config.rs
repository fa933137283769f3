//! Configuration handling for the mesh node.
//!
//! This module reads the node's section of the shared config file and applies
//! environment variable overrides on top of it.

use crate::logging::{build_filter, init_logging};
use anyhow::{bail, Context, Result};
use mesh_foundation::{ServerConfig, DEFAULT_HEARTBEAT_GRACE, DEFAULT_RESPONSE_TTL};
use mesh_storage::StorageMode;
use mesh_wire::{is_unicast, CompositionData};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Largest model list a composition element can carry
const MAX_MODELS_PER_ELEMENT: usize = u8::MAX as usize;

/// Mesh node configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Unicast address of the primary element
    pub primary_element_address: u16,
    /// TTL of configuration responses
    pub response_ttl: u8,
    /// Delay before the first heartbeat of a new publication
    #[serde(with = "duration_str")]
    pub heartbeat_grace: Duration,
    /// Composition data page 0
    pub composition: CompositionData,
    /// Application key storage
    pub storage: StorageConfig,
    /// Depth of the runtime command queue
    pub command_capacity: usize,
    /// Log level for mesh crates
    pub log_level: String,
}

/// Which storage backend to use
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageKind {
    /// Keys are lost on restart
    #[default]
    InMemory,
    /// One record file per key
    File,
}

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend
    pub mode: StorageKind,
    /// Data directory for the file backend
    pub data_dir: PathBuf,
    /// Fsync every record
    pub fsync: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            mode: StorageKind::InMemory,
            data_dir: PathBuf::from("./meshdata"),
            fsync: true,
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            primary_element_address: 0x0001,
            response_ttl: DEFAULT_RESPONSE_TTL,
            heartbeat_grace: DEFAULT_HEARTBEAT_GRACE,
            composition: CompositionData::default(),
            storage: StorageConfig::default(),
            command_capacity: 64,
            log_level: "info".to_string(),
        }
    }
}

/// Root configuration structure (matches the YAML structure)
#[derive(Debug, Deserialize)]
struct RootConfig {
    services: Option<ServicesConfig>,
}

#[derive(Debug, Deserialize)]
struct ServicesConfig {
    mesh: Option<NodeConfig>,
}

impl NodeConfig {
    /// Load configuration from file and environment variables
    pub fn load_from_file<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let mut config = Self::read_file(config_path.as_ref());
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        info!(
            "Final mesh configuration: element=0x{:04x}, response_ttl={}, heartbeat_grace={}, storage={:?}",
            config.primary_element_address,
            config.response_ttl,
            humantime::format_duration(config.heartbeat_grace),
            config.storage.mode
        );

        Ok(config)
    }

    fn read_file(config_path: &Path) -> Self {
        let content = match std::fs::read_to_string(config_path) {
            Ok(content) => content,
            Err(_) => {
                warn!("Config file {:?} not found, using defaults", config_path);
                return Self::default();
            }
        };

        match serde_yaml::from_str::<RootConfig>(&content) {
            Ok(root) => {
                info!("Loaded configuration from {:?}", config_path);
                root.services.and_then(|s| s.mesh).unwrap_or_default()
            }
            Err(e) => {
                warn!("Failed to parse config file {:?}: {}, using defaults", config_path, e);
                Self::default()
            }
        }
    }

    /// Apply overrides from `lookup`, normally the process environment
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("MESH_PRIMARY_ELEMENT_ADDRESS") {
            self.primary_element_address = parse_address(&value)
                .with_context(|| format!("invalid MESH_PRIMARY_ELEMENT_ADDRESS {:?}", value))?;
            info!(
                "Primary element address overridden by environment: 0x{:04x}",
                self.primary_element_address
            );
        }

        if let Some(value) = lookup("MESH_RESPONSE_TTL") {
            self.response_ttl = value
                .parse()
                .with_context(|| format!("invalid MESH_RESPONSE_TTL {:?}", value))?;
            info!("Response TTL overridden by environment: {}", self.response_ttl);
        }

        if let Some(value) = lookup("MESH_HEARTBEAT_GRACE") {
            self.heartbeat_grace = humantime::parse_duration(&value)
                .with_context(|| format!("invalid MESH_HEARTBEAT_GRACE {:?}", value))?;
            info!("Heartbeat grace overridden by environment: {}", value);
        }

        if let Some(value) = lookup("MESH_STORAGE_DIR") {
            self.storage.mode = StorageKind::File;
            self.storage.data_dir = PathBuf::from(value);
            info!("Storage directory overridden by environment: {:?}", self.storage.data_dir);
        }

        if let Some(value) = lookup("MESH_LOG_LEVEL") {
            info!("Log level overridden by environment: {}", value);
            self.log_level = value;
        }

        Ok(())
    }

    /// Reject values the server cannot run with
    pub fn validate(&self) -> Result<()> {
        if !is_unicast(self.primary_element_address) {
            bail!(
                "primary element address 0x{:04x} is not a unicast address",
                self.primary_element_address
            );
        }
        if self.response_ttl > 0x7F {
            bail!("response TTL {} exceeds 127", self.response_ttl);
        }
        if self.composition.elements.is_empty() {
            bail!("composition data must describe at least one element");
        }
        for (i, element) in self.composition.elements.iter().enumerate() {
            if element.sig_models.len() > MAX_MODELS_PER_ELEMENT
                || element.vendor_models.len() > MAX_MODELS_PER_ELEMENT
            {
                bail!(
                    "element {} lists more than {} SIG or vendor models",
                    i,
                    MAX_MODELS_PER_ELEMENT
                );
            }
        }
        if self.command_capacity == 0 {
            bail!("command capacity must be nonzero");
        }
        self.log_filter()
            .with_context(|| format!("invalid log level {:?}", self.log_level))?;
        Ok(())
    }

    /// Log filter for the configured level
    pub fn log_filter(&self) -> Result<EnvFilter> {
        build_filter(&self.log_level)
    }

    /// Install the global subscriber at the configured level
    pub fn init_logging(&self) -> Result<()> {
        init_logging(&self.log_level)
    }

    /// Server settings derived from this configuration
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            primary_element_address: self.primary_element_address,
            response_ttl: self.response_ttl,
            heartbeat_grace: self.heartbeat_grace,
            composition: self.composition.clone(),
        }
    }

    /// Storage backend selected by this configuration
    pub fn storage_mode(&self) -> StorageMode {
        match self.storage.mode {
            StorageKind::InMemory => StorageMode::InMemory,
            StorageKind::File => StorageMode::File {
                data_dir: self.storage.data_dir.clone(),
                fsync: self.storage.fsync,
            },
        }
    }
}

/// Parse a decimal or 0x-prefixed hexadecimal address
fn parse_address(value: &str) -> Result<u16> {
    let value = value.trim();
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16)?,
        None => value.parse::<u16>()?,
    };
    Ok(parsed)
}

/// Durations as humantime strings ("2s", "1500ms")
mod duration_str {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

//! Configuration file support for rmiflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (RMIFLASH_*)
//! 3. Local config file (./rmiflash.toml)
//! 4. Global config file (~/.config/rmiflash/config.toml)

use directories::ProjectDirs;
use log::{debug, warn};
use rmiflash::TransportKind;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Name of the local configuration file.
pub const LOCAL_CONFIG_FILE: &str = "rmiflash.toml";

/// Device configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device node, e.g. "/dev/hidraw0" or "/dev/serio_raw0".
    pub path: Option<String>,
    /// Transport name ("hid" or "ps2").
    pub transport: Option<String>,
    /// serio sysfs directory, e.g. "/sys/bus/serio/devices/serio1".
    pub sysfs: Option<PathBuf>,
}

impl DeviceConfig {
    /// Parsed transport, if one is configured and valid.
    pub fn transport_kind(&self) -> Option<TransportKind> {
        let name = self.transport.as_deref()?;
        let kind = TransportKind::from_name(name);
        if kind.is_none() {
            warn!("Ignoring unknown transport '{name}' in config");
        }
        kind
    }
}

/// Flash timing overrides, in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlashConfig {
    /// Idle-wait budget after each block.
    pub block_timeout_ms: Option<u64>,
    /// Pause after issuing the erase command.
    pub erase_settle_ms: Option<u64>,
    /// Idle-wait budget after the erase.
    pub erase_timeout_ms: Option<u64>,
    /// Pause after enabling flash programming.
    pub enable_settle_ms: Option<u64>,
    /// Dump register traffic by default.
    #[serde(default)]
    pub dump: bool,
}

impl FlashConfig {
    /// Apply the overrides on top of the library defaults.
    pub fn to_flash_config(&self) -> rmiflash::FlashConfig {
        let mut config = rmiflash::FlashConfig::default();
        if let Some(ms) = self.block_timeout_ms {
            config = config.with_block_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.erase_settle_ms {
            config = config.with_erase_settle(Duration::from_millis(ms));
        }
        if let Some(ms) = self.erase_timeout_ms {
            config = config.with_erase_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.enable_settle_ms {
            config = config.with_enable_settle(Duration::from_millis(ms));
        }
        config
    }
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Device configuration.
    #[serde(default)]
    pub device: DeviceConfig,
    /// Flash configuration.
    #[serde(default)]
    pub flash: FlashConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Local config overrides global
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "rmiflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.device.path.is_some() {
            self.device.path = other.device.path;
        }
        if other.device.transport.is_some() {
            self.device.transport = other.device.transport;
        }
        if other.device.sysfs.is_some() {
            self.device.sysfs = other.device.sysfs;
        }

        if other.flash.block_timeout_ms.is_some() {
            self.flash.block_timeout_ms = other.flash.block_timeout_ms;
        }
        if other.flash.erase_settle_ms.is_some() {
            self.flash.erase_settle_ms = other.flash.erase_settle_ms;
        }
        if other.flash.erase_timeout_ms.is_some() {
            self.flash.erase_timeout_ms = other.flash.erase_timeout_ms;
        }
        if other.flash.enable_settle_ms.is_some() {
            self.flash.enable_settle_ms = other.flash.enable_settle_ms;
        }
        if other.flash.dump {
            self.flash.dump = true;
        }
    }
}

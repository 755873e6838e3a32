//! Configuration system for proxkit.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $PROXKIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/proxkit/config.toml
//!   3. ~/.config/proxkit/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::wire::{
    BEACON_INTERVAL_MS, BEACON_PORT, MESSAGE_PORT, MULTICAST_ADDR, PEER_LIVENESS_WINDOW_MS,
};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct KitConfig {
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub messaging: MessagingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Network interface name. Empty = pass on the command line.
    pub interface: String,
    /// UDP port for discovery beacons.
    pub beacon_port: u16,
    /// UDP port for message datagrams.
    pub message_port: u16,
    /// IPv6 multicast group beacons are sent to.
    pub multicast_addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Milliseconds between two beacons of the local node.
    pub beacon_interval_ms: u64,
    /// A peer not sighted for this many milliseconds is lost.
    pub liveness_window_ms: u64,
    /// Milliseconds between two liveness sweeps.
    pub expiry_check_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    /// Largest payload the backend will put on the wire. Larger sends are dropped.
    pub max_payload_bytes: usize,
    /// Longest `msg_type` tag the backend will put on the wire.
    pub max_type_len: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            interface: String::new(),
            beacon_port: BEACON_PORT,
            message_port: MESSAGE_PORT,
            multicast_addr: MULTICAST_ADDR.to_string(),
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            beacon_interval_ms: BEACON_INTERVAL_MS,
            liveness_window_ms: PEER_LIVENESS_WINDOW_MS,
            expiry_check_ms: 1_000,
        }
    }
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            max_payload_bytes: 16 * 1024,
            max_type_len: 64,
        }
    }
}

impl DiscoveryConfig {
    pub fn liveness_window(&self) -> Duration {
        Duration::from_millis(self.liveness_window_ms)
    }

    pub fn beacon_interval(&self) -> Duration {
        Duration::from_millis(self.beacon_interval_ms.max(1))
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_millis(self.expiry_check_ms.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("proxkit")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl KitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = Self::load_file(&path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse a config file, or return defaults if it does not exist.
    pub fn load_file(path: &PathBuf) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(KitConfig::default());
        }
        let text =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("PROXKIT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&KitConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply PROXKIT_* overrides. `lookup` resolves a variable name.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("PROXKIT_NETWORK__INTERFACE") {
            self.network.interface = v;
        }
        if let Some(p) = lookup("PROXKIT_NETWORK__BEACON_PORT").and_then(|v| v.parse().ok()) {
            self.network.beacon_port = p;
        }
        if let Some(p) = lookup("PROXKIT_NETWORK__MESSAGE_PORT").and_then(|v| v.parse().ok()) {
            self.network.message_port = p;
        }
        if let Some(ms) =
            lookup("PROXKIT_DISCOVERY__LIVENESS_WINDOW_MS").and_then(|v| v.parse().ok())
        {
            self.discovery.liveness_window_ms = ms;
        }
        if let Some(ms) =
            lookup("PROXKIT_DISCOVERY__BEACON_INTERVAL_MS").and_then(|v| v.parse().ok())
        {
            self.discovery.beacon_interval_ms = ms;
        }
    }
}

//! Configuration system for Velium.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $VELIUM_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/velium/config.toml
//!   3. ~/.config/velium/config.toml

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::wire::DEFAULT_PORT;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VeliumConfig {
    pub network: NetworkConfig,
    pub timeouts: TimeoutConfig,
    pub limits: LimitConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address both transports bind to.
    pub bind_addr: String,
    /// Shared TCP/UDP port. 0 = OS-assigned (TCP picks, UDP follows).
    pub port: u16,
    /// Local HTTP status API port. 0 = disabled.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a TCP client may stay connected without identifying.
    pub identify_grace_ms: u64,
    /// Silence after which a TCP connection or UDP endpoint is reaped.
    pub idle_timeout_ms: u64,
    /// How often the idle reaper sweeps.
    pub sweep_interval_ms: u64,
    /// Session lifetime without activity on the owning TCP connection.
    pub session_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitConfig {
    /// Longest accepted TCP line, excluding the terminator.
    pub max_line_bytes: usize,
    /// Receive buffer for a single UDP datagram.
    pub max_datagram_bytes: usize,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            api_port: 0,
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            identify_grace_ms: 5_000,
            idle_timeout_ms: 30_000,
            sweep_interval_ms: 10_000,
            session_ttl_secs: 300,
        }
    }
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            max_line_bytes: 4096,
            max_datagram_bytes: 1024,
        }
    }
}

impl TimeoutConfig {
    pub fn identify_grace(&self) -> Duration {
        Duration::from_millis(self.identify_grace_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("velium")
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

impl VeliumConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Parse the file at `path`, or defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(VeliumConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("VELIUM_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        Self::write_default_at(&path)?;
        Ok(path)
    }

    /// Write the default config to `path` unless a file is already there.
    /// Returns whether a file was written.
    pub fn write_default_at(path: &std::path::Path) -> Result<bool, ConfigError> {
        if path.exists() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        }
        let text = toml::to_string_pretty(&VeliumConfig::default())
            .map_err(ConfigError::SerializeFailed)?;
        std::fs::write(path, text).map_err(|e| ConfigError::WriteFailed(path.to_path_buf(), e))?;
        Ok(true)
    }

    /// Apply VELIUM_* overrides. `lookup` is `std::env::var` outside tests.
    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("VELIUM_NETWORK__BIND_ADDR") {
            self.network.bind_addr = v;
        }
        if let Some(p) = lookup("VELIUM_NETWORK__PORT").and_then(|v| v.parse().ok()) {
            self.network.port = p;
        }
        if let Some(p) = lookup("VELIUM_NETWORK__API_PORT").and_then(|v| v.parse().ok()) {
            self.network.api_port = p;
        }
        if let Some(ms) = lookup("VELIUM_TIMEOUTS__IDLE_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.timeouts.idle_timeout_ms = ms;
        }
        if let Some(ms) = lookup("VELIUM_TIMEOUTS__IDENTIFY_GRACE_MS").and_then(|v| v.parse().ok())
        {
            self.timeouts.identify_grace_ms = ms;
        }
    }
}

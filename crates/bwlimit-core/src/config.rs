//! Configuration system for bwlimit.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $BWLIMIT_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/bwlimit/config.toml
//!   3. ~/.config/bwlimit/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::limit::Limit;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BwlimitConfig {
    pub listen: ListenConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenConfig {
    /// Address the daemon binds. Port 0 = OS-assigned.
    pub addr: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Aggregate cap across all connections of one listener. 0 = unlimited.
    pub global_bytes_per_sec: u64,
    /// Cap applied to each connection individually. 0 = unlimited.
    pub per_conn_bytes_per_sec: u64,
    /// Longest a single read or write may wait for tokens. 0 = forever.
    pub wait_timeout_ms: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:7070".to_string(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            global_bytes_per_sec: 0,
            per_conn_bytes_per_sec: 0,
            wait_timeout_ms: 0,
        }
    }
}

impl LimitsConfig {
    pub fn global(&self) -> Limit {
        Limit::from(self.global_bytes_per_sec)
    }

    pub fn per_conn(&self) -> Limit {
        Limit::from(self.per_conn_bytes_per_sec)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        (self.wait_timeout_ms > 0).then(|| Duration::from_millis(self.wait_timeout_ms))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("bwlimit")
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

impl BwlimitConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&Self::file_path())?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Read one file, falling back to defaults if it does not exist.
    pub fn load_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(BwlimitConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(path.to_path_buf(), e))?;
        toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.to_path_buf(), e))
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("BWLIMIT_CONFIG")
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
            let text = toml::to_string_pretty(&BwlimitConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply BWLIMIT_* env var overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Values that fail to parse are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("BWLIMIT_LISTEN__ADDR") {
            self.listen.addr = v;
        }
        if let Some(n) = lookup("BWLIMIT_LIMITS__GLOBAL_BYTES_PER_SEC").and_then(|v| v.parse().ok()) {
            self.limits.global_bytes_per_sec = n;
        }
        if let Some(n) = lookup("BWLIMIT_LIMITS__PER_CONN_BYTES_PER_SEC").and_then(|v| v.parse().ok()) {
            self.limits.per_conn_bytes_per_sec = n;
        }
        if let Some(n) = lookup("BWLIMIT_LIMITS__WAIT_TIMEOUT_MS").and_then(|v| v.parse().ok()) {
            self.limits.wait_timeout_ms = n;
        }
    }
}

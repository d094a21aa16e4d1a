//! Aegis service configuration
//!
//! The service configuration is read once at startup (TOML). It is distinct
//! from the policy document, which is re-read on every checkpoint call; see
//! [`crate::policy`].

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main Aegis configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AegisConfig {
    /// HTTP operation surface
    pub server: ServerConfig,

    /// Policy source location
    pub policy: PolicyConfig,

    /// Event log configuration
    pub events: EventLogConfig,

    /// Scan limits
    pub limits: LimitsConfig,
}

impl AegisConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Render as pretty TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Internal(e.to_string()))
    }

    /// Default config file location (`~/.aegis/aegis.toml`)
    pub fn default_path() -> PathBuf {
        data_dir().join("aegis.toml")
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Allowed CORS origins (empty = any)
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 18791,
            cors_origins: Vec::new(),
        }
    }
}

/// Policy source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Path to the policy document (`.json`, `.yaml`/`.yml`, or `.toml`)
    pub path: PathBuf,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config.json"),
        }
    }
}

/// Event log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Persist events to disk
    pub enabled: bool,

    /// Active JSONL file
    pub path: PathBuf,

    /// Rotate the active file once it reaches this size
    pub max_file_bytes: u64,

    /// Rotated files to keep
    pub max_rotated_files: usize,

    /// Records kept in memory for status queries
    pub buffer_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("security_events.jsonl"),
            max_file_bytes: 10 * 1024 * 1024,
            max_rotated_files: 5,
            buffer_capacity: 10_000,
        }
    }
}

/// Scan limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest content accepted by either scanner
    pub max_content_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_bytes: 1024 * 1024,
        }
    }
}

/// Base data directory (`~/.aegis`)
pub fn data_dir() -> PathBuf {
    dirs_next::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".aegis")
}

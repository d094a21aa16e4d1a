//! Aegis error types

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Aegis error type
#[derive(Error, Debug)]
pub enum Error {
    /// Policy source missing, malformed, or semantically invalid
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal detector failure
    #[error("Scan error: {0}")]
    Scan(String),

    /// Event log write failure
    #[error("Log error: {0}")]
    Log(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy as recorded in the event log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConfigError,
    ScanError,
    LogError,
    Internal,
}

impl Error {
    /// Classify this error for event records.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::ConfigError,
            Self::Scan(_) => ErrorKind::ScanError,
            Self::Log(_) | Self::Io(_) => ErrorKind::LogError,
            Self::Serialization(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// Result type alias for Aegis operations
pub type Result<T> = std::result::Result<T, Error>;

//! Policy sources
//!
//! A source hands back the raw policy document; parsing and validation
//! happen in [`super::types`]. Sources are consulted on every checkpoint
//! call, so edits to the backing file take effect on the next call.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;

/// Serialization format of a policy document
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyFormat {
    Json,
    Yaml,
    Toml,
}

impl PolicyFormat {
    /// Pick the format from a file extension (JSON when unknown).
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

/// Raw policy document as fetched from a source
#[derive(Debug, Clone)]
pub struct RawPolicy {
    pub content: String,
    pub format: PolicyFormat,
    /// Human-readable origin for logs
    pub origin: String,
}

/// Mutable external source of the policy document.
#[async_trait]
pub trait PolicySource: Send + Sync {
    /// Fetch the current document.
    async fn fetch(&self) -> Result<RawPolicy>;

    /// Describe the source for logs.
    fn describe(&self) -> String;
}

/// Policy document on the local filesystem
pub struct FilePolicySource {
    path: PathBuf,
    format: PolicyFormat,
}

impl FilePolicySource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = PolicyFormat::from_path(&path);
        Self { path, format }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl PolicySource for FilePolicySource {
    async fn fetch(&self) -> Result<RawPolicy> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            Error::Config(format!(
                "Failed to read policy {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(RawPolicy {
            content,
            format: self.format,
            origin: self.describe(),
        })
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// In-memory policy document, replaceable at runtime
pub struct StaticPolicySource {
    content: RwLock<Option<String>>,
    format: PolicyFormat,
}

impl StaticPolicySource {
    /// Create a JSON source with the given document.
    pub fn json(content: impl Into<String>) -> Self {
        Self::new(content, PolicyFormat::Json)
    }

    pub fn new(content: impl Into<String>, format: PolicyFormat) -> Self {
        Self {
            content: RwLock::new(Some(content.into())),
            format,
        }
    }

    /// Replace the document.
    pub async fn set(&self, content: impl Into<String>) {
        *self.content.write().await = Some(content.into());
    }

    /// Remove the document, so fetches fail as if the source were missing.
    pub async fn clear(&self) {
        *self.content.write().await = None;
    }
}

#[async_trait]
impl PolicySource for StaticPolicySource {
    async fn fetch(&self) -> Result<RawPolicy> {
        let content = self
            .content
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::Config("Policy source is empty".to_string()))?;
        Ok(RawPolicy {
            content,
            format: self.format,
            origin: self.describe(),
        })
    }

    fn describe(&self) -> String {
        "static".to_string()
    }
}

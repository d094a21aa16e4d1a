//! Policy store with fallback-to-last-good
//!
//! The store re-reads its source on every call. A document that fails to
//! load never replaces the last validated snapshot; the snapshot is swapped
//! atomically behind an `Arc`, so concurrent scans never observe a partly
//! applied update. Loads are serialized, so the snapshot always reflects
//! the most recently fetched document.

use super::source::PolicySource;
use super::types::{digest_of, Policy};
use crate::error::{Error, Result};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Outcome of a tolerant reload
#[derive(Debug)]
pub struct PolicyLoad {
    /// Policy in effect for this call (fresh or last good)
    pub policy: Arc<Policy>,
    /// Configuration error absorbed by falling back
    pub error: Option<Error>,
}

impl PolicyLoad {
    /// Whether the returned policy is a fallback.
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }
}

/// Loads and validates the rule set from a mutable source
pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    last_good: RwLock<Arc<Policy>>,
    loading: Mutex<()>,
}

impl PolicyStore {
    /// Create a store; the bootstrap policy stays in effect until the first
    /// successful load.
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            last_good: RwLock::new(Arc::new(Policy::bootstrap())),
            loading: Mutex::new(()),
        }
    }

    /// Load the current document, failing with `Error::Config` when it is
    /// missing, malformed, or invalid.
    pub async fn load(&self) -> Result<Arc<Policy>> {
        let _loading = self.loading.lock().await;
        let raw = self.source.fetch().await?;
        let digest = digest_of(&raw.content);

        {
            let current = self.last_good.read().await;
            if current.digest == digest {
                return Ok(current.clone());
            }
        }

        let policy = Arc::new(Policy::from_raw(&raw)?);
        *self.last_good.write().await = policy.clone();

        tracing::info!(
            origin = %raw.origin,
            digest = %policy.digest,
            scanner_enabled = policy.enabled_injection_scanner,
            threshold = policy.injection_threshold,
            entities = policy.pii_entities.len(),
            "Policy loaded"
        );
        Ok(policy)
    }

    /// Load the current document, falling back to the last good snapshot on
    /// failure. Never fails.
    pub async fn reload(&self) -> PolicyLoad {
        match self.load().await {
            Ok(policy) => PolicyLoad {
                policy,
                error: None,
            },
            Err(e) => {
                let policy = self.current().await;
                tracing::error!(
                    source = %self.source.describe(),
                    fallback_digest = %policy.digest,
                    "Policy reload failed, keeping last good policy: {}",
                    e
                );
                PolicyLoad {
                    policy,
                    error: Some(e),
                }
            }
        }
    }

    /// Last successfully validated snapshot.
    pub async fn current(&self) -> Arc<Policy> {
        self.last_good.read().await.clone()
    }

    /// Describe the backing source.
    pub fn describe(&self) -> String {
        self.source.describe()
    }
}

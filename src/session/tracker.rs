//! Session taint tracking
//!
//! Each session is a two-state machine:
//!
//! ```text
//!            scan fails (is_valid = false)
//!   CLEAN ─────────────────────────────────▶ TAINTED
//!     ▲                                          │
//!     └──────────── explicit reset ◀─────────────┘
//! ```
//!
//! A later clean scan never clears taint. Each session has its own mutex;
//! callers hold a [`SessionGuard`] for the whole read-decide-write sequence
//! of one operation, so a concurrent analyze and reset on the same id never
//! lose an update. Different sessions never contend beyond the brief table
//! lookup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Taint state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaintState {
    Clean,
    Tainted,
}

impl std::fmt::Display for TaintState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "CLEAN"),
            Self::Tainted => write!(f, "TAINTED"),
        }
    }
}

/// A tracked session
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    state: TaintState,
    taint_reason: Option<String>,
    tainted_at: Option<i64>,
    created_at: i64,
    last_updated_at: i64,
}

impl Session {
    fn new(id: &str) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: id.to_string(),
            state: TaintState::Clean,
            taint_reason: None,
            tainted_at: None,
            created_at: now,
            last_updated_at: now,
        }
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id.clone(),
            state: self.state,
            tainted: self.state == TaintState::Tainted,
            taint_reason: self.taint_reason.clone(),
            tainted_at: self.tainted_at,
            created_at: self.created_at,
            last_updated_at: self.last_updated_at,
        }
    }
}

/// Read-only copy of a session for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub state: TaintState,
    pub tainted: bool,
    pub taint_reason: Option<String>,
    /// Unix millis
    pub tainted_at: Option<i64>,
    pub created_at: i64,
    pub last_updated_at: i64,
}

/// Exclusive access to one session for the duration of an operation
pub struct SessionGuard {
    session: OwnedMutexGuard<Session>,
}

impl SessionGuard {
    pub fn id(&self) -> &str {
        &self.session.id
    }

    pub fn state(&self) -> TaintState {
        self.session.state
    }

    pub fn is_tainted(&self) -> bool {
        self.session.state == TaintState::Tainted
    }

    pub fn taint_reason(&self) -> Option<&str> {
        self.session.taint_reason.as_deref()
    }

    /// CLEAN → TAINTED. Returns false if the session was already tainted,
    /// in which case the original reason and timestamp are kept.
    pub fn mark_tainted(&mut self, reason: impl Into<String>) -> bool {
        if self.is_tainted() {
            return false;
        }
        let now = chrono::Utc::now().timestamp_millis();
        let reason = reason.into();
        tracing::warn!(session_id = %self.session.id, reason = %reason, "Session tainted");
        self.session.state = TaintState::Tainted;
        self.session.taint_reason = Some(reason);
        self.session.tainted_at = Some(now);
        self.session.last_updated_at = now;
        true
    }

    /// TAINTED → CLEAN. Always succeeds; returns whether the session was
    /// tainted before the call.
    pub fn reset(&mut self) -> bool {
        let was_tainted = self.is_tainted();
        if was_tainted {
            self.session.state = TaintState::Clean;
            self.session.taint_reason = None;
            self.session.tainted_at = None;
            self.session.last_updated_at = chrono::Utc::now().timestamp_millis();
            tracing::info!(session_id = %self.session.id, "Session reset to clean");
        }
        was_tainted
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }
}

/// Owner of the session table
#[derive(Default)]
pub struct TaintTracker {
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
}

impl TaintTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock a session, creating it clean on first reference.
    pub async fn acquire(&self, session_id: &str) -> SessionGuard {
        let entry = self.entry(session_id).await;
        SessionGuard {
            session: entry.lock_owned().await,
        }
    }

    async fn entry(&self, session_id: &str) -> Arc<Mutex<Session>> {
        if let Some(entry) = self.sessions.read().await.get(session_id) {
            return entry.clone();
        }
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                tracing::debug!(session_id = %session_id, "New session");
                Arc::new(Mutex::new(Session::new(session_id)))
            })
            .clone()
    }

    /// Snapshot a known session without creating it.
    pub async fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        let entry = self.sessions.read().await.get(session_id).cloned()?;
        let session = entry.lock().await;
        Some(session.snapshot())
    }

    /// Ids of all tainted sessions, sorted.
    pub async fn tainted_sessions(&self) -> Vec<String> {
        let entries: Vec<Arc<Mutex<Session>>> =
            self.sessions.read().await.values().cloned().collect();
        let mut tainted = Vec::new();
        for entry in entries {
            let session = entry.lock().await;
            if session.state == TaintState::Tainted {
                tainted.push(session.id.clone());
            }
        }
        tainted.sort();
        tainted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

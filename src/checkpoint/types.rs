//! Checkpoint request and response types
//!
//! Shared by the HTTP router, the stdio surface and the CLI. All fields are
//! snake_case on the wire.

use crate::error::{Error, ErrorKind};
use crate::events::{EventAction, EventTotals};
use crate::scanner::Finding;
use crate::session::TaintState;
use serde::{Deserialize, Serialize};

/// Session used when a caller does not name one
pub const DEFAULT_SESSION_ID: &str = "default";

/// Resolve an optional session id, treating blank as absent.
pub fn session_or_default(session_id: Option<&str>) -> &str {
    match session_id {
        Some(id) if !id.trim().is_empty() => id,
        _ => DEFAULT_SESSION_ID,
    }
}

/// Error surfaced inside a well-formed response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for CheckpointError {
    fn from(e: &Error) -> Self {
        Self {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    #[serde(alias = "content_to_scan")]
    pub content: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub is_valid: bool,
    pub score: f64,
    pub matched_rules: Vec<String>,
    /// Session state after the call
    pub status: TaintState,
    pub action: EventAction,
    /// Scanner disabled by policy; the verdict was not evaluated
    #[serde(default)]
    pub bypassed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CheckpointError>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanOutputRequest {
    #[serde(alias = "data_to_scan")]
    pub data: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanOutputResponse {
    /// `None` when the scan failed; unscanned data is never returned
    pub sanitized_data: Option<String>,
    pub findings: Vec<Finding>,
    pub status: TaintState,
    pub action: EventAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<CheckpointError>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetResponse {
    pub success: bool,
    pub message: String,
    pub was_tainted: bool,
}

/// Service overview for operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub scanner_enabled: bool,
    pub injection_threshold: f64,
    pub pii_entities: Vec<String>,
    pub policy_digest: String,
    pub policy_source: String,
    /// Set when the current policy is a fallback
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_error: Option<String>,
    pub tracked_sessions: usize,
    pub tainted_sessions: Vec<String>,
    pub events: EventTotals,
}

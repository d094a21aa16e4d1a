//! Event record types
//!
//! One record per checkpoint decision, plus one per absorbed configuration
//! error. Field names and enum values are what the external viewer reads
//! from the JSONL log.

use crate::error::ErrorKind;
use crate::scanner::Finding;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Longest input preview stored in a record, in characters
pub const PREVIEW_CHARS: usize = 200;

/// Checkpoint operation that produced a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    AnalyzeIncomingContent,
    ScanOutputData,
    ResetSession,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AnalyzeIncomingContent => write!(f, "analyze_incoming_content"),
            Self::ScanOutputData => write!(f, "scan_output_data"),
            Self::ResetSession => write!(f, "reset_session"),
        }
    }
}

/// Event category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    InjectionDetected,
    Info,
    PiiRedacted,
    PiiDetected,
    AdminAction,
    ConfigError,
    ScanError,
}

/// Decision taken by the checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventAction {
    BlockedInput,
    AllowedInput,
    BypassedInput,
    RedactedOutput,
    AllowedOutput,
    SuppressedOutput,
    SessionReset,
    PolicyFallback,
}

impl EventAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BlockedInput => "BLOCKED_INPUT",
            Self::AllowedInput => "ALLOWED_INPUT",
            Self::BypassedInput => "BYPASSED_INPUT",
            Self::RedactedOutput => "REDACTED_OUTPUT",
            Self::AllowedOutput => "ALLOWED_OUTPUT",
            Self::SuppressedOutput => "SUPPRESSED_OUTPUT",
            Self::SessionReset => "SESSION_RESET",
            Self::PolicyFallback => "POLICY_FALLBACK",
        }
    }
}

impl std::fmt::Display for EventAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operation-specific payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventDetails {
    Verdict {
        content_preview: String,
        is_valid: bool,
        matched_rules: Vec<String>,
        bypassed: bool,
        /// Blocked by existing taint without scoring
        short_circuit: bool,
    },
    Findings {
        findings: Vec<Finding>,
        /// Redacted copy; never the raw output
        sanitized_data: Option<String>,
        redacted: bool,
    },
    Reset {
        actor: Option<String>,
        reason: Option<String>,
        was_tainted: bool,
    },
    Error {
        error_kind: ErrorKind,
        message: String,
    },
}

/// An immutable log record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    /// RFC 3339
    pub timestamp: String,
    pub session_id: String,
    pub operation: Operation,
    pub event_type: EventType,
    pub action: EventAction,
    pub risk_score: f64,
    pub details: EventDetails,
    pub policy_digest: String,
}

impl EventRecord {
    pub fn new(
        session_id: &str,
        operation: Operation,
        event_type: EventType,
        action: EventAction,
        details: EventDetails,
    ) -> Self {
        Self {
            id: format!("evt-{}", uuid::Uuid::new_v4()),
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_id: session_id.to_string(),
            operation,
            event_type,
            action,
            risk_score: 0.0,
            details,
            policy_digest: String::new(),
        }
    }

    pub fn with_risk_score(mut self, score: f64) -> Self {
        self.risk_score = score;
        self
    }

    pub fn with_policy_digest(mut self, digest: impl Into<String>) -> Self {
        self.policy_digest = digest.into();
        self
    }
}

/// Truncate input to a log-safe preview.
pub fn preview(content: &str) -> String {
    match content.char_indices().nth(PREVIEW_CHARS) {
        Some((idx, _)) => format!("{}...", &content[..idx]),
        None => content.to_string(),
    }
}

/// Record counts by action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTotals {
    pub total_events: u64,
    pub by_action: BTreeMap<EventAction, u64>,
}

impl EventTotals {
    pub fn record(&mut self, action: EventAction) {
        self.total_events += 1;
        *self.by_action.entry(action).or_insert(0) += 1;
    }

    pub fn count(&self, action: EventAction) -> u64 {
        self.by_action.get(&action).copied().unwrap_or(0)
    }
}

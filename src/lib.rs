//! Aegis - Security Checkpoint for AI Agents
//!
//! Aegis sits between an agent and both its untrusted inputs and its
//! outgoing responses. Incoming text is scored for prompt injection,
//! outgoing text is scanned for sensitive data, and every session carries
//! a sticky taint flag that gates further input once an attack is seen.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         Hosting runtime                           │
//! │            HTTP (api)  ·  JSON lines (stdio)  ·  CLI              │
//! └───────────────────────────────┬──────────────────────────────────┘
//!                                 │
//! ┌───────────────────────────────▼──────────────────────────────────┐
//! │                        Checkpoint API                             │
//! │  analyze_incoming_content · scan_output_data · reset_session      │
//! │                                                                   │
//! │   ┌──────────────┐   reload every call   ┌───────────────────┐    │
//! │   │ Policy Store │ ◀──────────────────── │ config.json/yaml  │    │
//! │   └──────┬───────┘   last good on error  └───────────────────┘    │
//! │          │ Arc<Policy>                                            │
//! │   ┌──────▼───────────┐      ┌──────────────────────┐              │
//! │   │ Injection Scorer │      │ PII Detector/Redactor│              │
//! │   └──────┬───────────┘      └──────────┬───────────┘              │
//! │          │ verdict                      │ findings                │
//! │   ┌──────▼───────────┐                  │                         │
//! │   │  Taint Tracker   │  CLEAN ⇄ TAINTED │                         │
//! │   └──────┬───────────┘                  │                         │
//! │          └──────────────┬───────────────┘                         │
//! │                  ┌──────▼──────┐                                  │
//! │                  │ Event Log   │ ──▶ security_events.jsonl        │
//! │                  └─────────────┘                                  │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`checkpoint`]: the callable operations and their HTTP/stdio surfaces
//! - [`policy`]: policy document, sources and the fallback store
//! - [`scanner`]: injection scorer and PII detector
//! - [`session`]: per-session taint state machine
//! - [`events`]: append-only security event log
//! - [`config`]: service configuration

pub mod api;
pub mod bootstrap;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod events;
pub mod policy;
pub mod scanner;
pub mod session;

pub use checkpoint::Checkpoint;
pub use config::AegisConfig;
pub use error::{Error, Result};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

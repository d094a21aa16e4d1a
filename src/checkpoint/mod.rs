//! Checkpoint API
//!
//! The callable operations (`analyze_incoming_content`, `scan_output_data`,
//! `reset_session`, `get_status`) and the two thin surfaces that expose
//! them: an HTTP router and a JSON-lines stdio loop.

pub mod handler;
pub mod service;
pub mod stdio;
pub mod types;

pub use handler::{checkpoint_router, CheckpointState};
pub use service::{Checkpoint, EventStats, SCAN_ERROR_RULE, SESSION_TAINTED_RULE};
pub use types::*;

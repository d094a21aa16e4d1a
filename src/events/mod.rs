//! Security event log
//!
//! Every checkpoint call appends one record; absorbed policy errors add a
//! `CONFIG_ERROR` record. The JSONL file is what the external dashboard
//! tails.

pub mod log;
pub mod types;

pub use log::{read_jsonl, EventLog, EventSink};
pub use types::{
    preview, EventAction, EventDetails, EventRecord, EventTotals, EventType, Operation,
};

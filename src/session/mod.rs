//! Per-session taint state

mod tracker;

pub use tracker::{Session, SessionGuard, SessionSnapshot, TaintState, TaintTracker};

//! Policy store
//!
//! Loads the detection rule set (thresholds, enabled scanners, PII entity
//! list, custom patterns) from a mutable external source. The source is
//! re-read at the start of every checkpoint call; a bad update falls back
//! to the last good snapshot instead of failing the call.

pub mod source;
pub mod store;
pub mod types;

pub use source::{FilePolicySource, PolicyFormat, PolicySource, RawPolicy, StaticPolicySource};
pub use store::{PolicyLoad, PolicyStore};
pub use types::{CustomPattern, CustomPatternDef, Policy, PolicyDocument};

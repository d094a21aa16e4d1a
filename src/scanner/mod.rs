//! Content scanners
//!
//! Two scanners sit behind the checkpoint:
//!
//! ```text
//! incoming text → InputScanner  (InjectionScorer)  → ScanVerdict
//! outgoing text → OutputScanner (PiiDetector)      → RedactionResult
//! ```
//!
//! Both take the policy snapshot for the current call and are pure with
//! respect to it. Either may fail with `Error::Scan`; the checkpoint turns
//! that into a fail-closed result.

pub mod injection;
pub mod pii;

pub use injection::{InjectionCategory, InjectionScorer, ScanVerdict};
pub use pii::{BuiltInEntity, Finding, Matcher, PiiDetector, RedactionResult};

use crate::error::Result;
use crate::policy::Policy;

/// Scores incoming content for prompt injection.
pub trait InputScanner: Send + Sync {
    fn score(&self, content: &str, policy: &Policy) -> Result<ScanVerdict>;
}

/// Detects and redacts sensitive entities in outgoing content.
pub trait OutputScanner: Send + Sync {
    fn scan_and_redact(&self, content: &str, policy: &Policy) -> Result<RedactionResult>;
}

impl InputScanner for InjectionScorer {
    fn score(&self, content: &str, policy: &Policy) -> Result<ScanVerdict> {
        InjectionScorer::score(self, content, policy)
    }
}

impl OutputScanner for PiiDetector {
    fn scan_and_redact(&self, content: &str, policy: &Policy) -> Result<RedactionResult> {
        PiiDetector::scan_and_redact(self, content, policy)
    }
}

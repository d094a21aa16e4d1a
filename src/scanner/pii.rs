//! PII detection and redaction
//!
//! The policy's entity list is resolved into an ordered list of matchers,
//! one per entity name: a built-in detector, a custom regex group from the
//! policy, or both when a name is defined twice. Custom patterns that are
//! not listed in `pii_entities_to_scan` stay inactive.
//!
//! Every qualifying span is replaced with a marker of the form
//! `[REDACTED_<ENTITY>]`. Markers already present in the input are never
//! matched again, so redacting redacted text finds nothing.

use crate::error::{Error, Result};
use crate::policy::{CustomPattern, Policy};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Built-in entity types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BuiltInEntity {
    CreditCard,
    EmailAddress,
    PhoneNumber,
    UsSsn,
    IpAddress,
    IbanCode,
    Uuid,
    Crypto,
}

impl BuiltInEntity {
    pub const ALL: [BuiltInEntity; 8] = [
        Self::CreditCard,
        Self::EmailAddress,
        Self::PhoneNumber,
        Self::UsSsn,
        Self::IpAddress,
        Self::IbanCode,
        Self::Uuid,
        Self::Crypto,
    ];

    /// Entity name as used in `pii_entities_to_scan`
    pub fn name(self) -> &'static str {
        match self {
            Self::CreditCard => "CREDIT_CARD",
            Self::EmailAddress => "EMAIL_ADDRESS",
            Self::PhoneNumber => "PHONE_NUMBER",
            Self::UsSsn => "US_SSN",
            Self::IpAddress => "IP_ADDRESS",
            Self::IbanCode => "IBAN_CODE",
            Self::Uuid => "UUID",
            Self::Crypto => "CRYPTO",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|e| e.name() == name)
    }

    /// Patterns are ASCII-only: digits in other scripts never qualify.
    fn pattern(self) -> &'static str {
        match self {
            Self::CreditCard => r"\b[0-9](?:[ -]?[0-9]){12,18}\b",
            Self::EmailAddress => r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b",
            Self::PhoneNumber => {
                r"(?:\+[0-9]{1,3}[ \t.-]?)?(?:\([0-9]{3}\)[ \t]?|\b[0-9]{3}[ \t.-]?)[0-9]{3}[ \t.-]?[0-9]{4}\b"
            }
            Self::UsSsn => r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b",
            Self::IpAddress => {
                r"\b(?:(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\.){3}(?:25[0-5]|2[0-4][0-9]|1[0-9][0-9]|[1-9]?[0-9])\b"
            }
            Self::IbanCode => r"\b[A-Z]{2}[0-9]{2}(?: ?[A-Z0-9]{4}){2,7}(?: ?[A-Z0-9]{1,3})?\b",
            Self::Uuid => {
                r"\b[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\b"
            }
            Self::Crypto => r"\b(?:bc1[a-z0-9]{25,39}|[13][a-km-zA-HJ-NP-Z1-9]{25,34})\b",
        }
    }

    fn score(self) -> f64 {
        match self {
            Self::CreditCard | Self::EmailAddress | Self::IbanCode => 0.9,
            Self::UsSsn => 0.85,
            Self::PhoneNumber | Self::IpAddress => 0.75,
            Self::Crypto => 0.7,
            Self::Uuid => 0.6,
        }
    }

    /// Checksum validation on top of the regex
    fn validate(self, text: &str) -> bool {
        match self {
            Self::CreditCard => luhn_valid(text),
            Self::IbanCode => iban_valid(text),
            _ => true,
        }
    }
}

impl std::fmt::Display for BuiltInEntity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// One resolved detector for the current call
#[derive(Debug, Clone, Copy)]
pub enum Matcher<'a> {
    BuiltIn(BuiltInEntity),
    Custom(&'a CustomPattern),
}

impl Matcher<'_> {
    pub fn entity(&self) -> &str {
        match self {
            Self::BuiltIn(e) => e.name(),
            Self::Custom(p) => &p.name,
        }
    }
}

/// Resolve the policy's entity list into matchers, in list order.
pub fn resolve_matchers(policy: &Policy) -> Vec<Matcher<'_>> {
    let mut matchers = Vec::new();
    for name in &policy.pii_entities {
        let builtin = BuiltInEntity::from_name(name);
        let custom = policy.custom_pattern(name);
        if let Some(entity) = builtin {
            matchers.push(Matcher::BuiltIn(entity));
        }
        if let Some(pattern) = custom {
            matchers.push(Matcher::Custom(pattern));
        }
        if builtin.is_none() && custom.is_none() {
            tracing::warn!(entity = %name, "Unknown PII entity in policy, ignoring");
        }
    }
    matchers
}

/// A detected sensitive span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub entity: String,
    /// Byte offset in the scanned content
    pub start: usize,
    pub end: usize,
    pub score: f64,
}

/// Result of one output scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RedactionResult {
    pub sanitized_data: String,
    /// Ascending by start offset
    pub findings: Vec<Finding>,
}

impl RedactionResult {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    /// Highest finding score, 0.0 when clean
    pub fn max_score(&self) -> f64 {
        self.findings.iter().map(|f| f.score).fold(0.0, f64::max)
    }
}

/// Marker written in place of a redacted span
pub fn redaction_marker(entity: &str) -> String {
    let tag: String = entity
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("[REDACTED_{}]", tag)
}

/// Words on each side of a custom match searched for context keywords
pub const CONTEXT_WINDOW_WORDS: usize = 5;

/// Upper bound on detection passes per scan
const MAX_DETECTION_PASSES: usize = 8;

struct Candidate {
    entity: String,
    range: Range<usize>,
    score: f64,
    order: usize,
}

/// Detector for built-in and custom entities
pub struct PiiDetector {
    builtins: Vec<(BuiltInEntity, Regex)>,
    marker: Regex,
    max_content_bytes: usize,
}

impl PiiDetector {
    /// Compile the built-in detectors.
    pub fn new() -> Result<Self> {
        let builtins = BuiltInEntity::ALL
            .into_iter()
            .map(|entity| {
                Regex::new(entity.pattern())
                    .map(|re| (entity, re))
                    .map_err(|e| Error::Scan(format!("Invalid built-in pattern {}: {}", entity, e)))
            })
            .collect::<Result<Vec<_>>>()?;

        let marker = Regex::new(r"\[REDACTED_[A-Z0-9_]+\]")
            .map_err(|e| Error::Scan(format!("Invalid marker pattern: {}", e)))?;

        Ok(Self {
            builtins,
            marker,
            max_content_bytes: usize::MAX,
        })
    }

    /// Reject content larger than `limit` bytes with `Error::Scan`.
    pub fn with_max_content_bytes(mut self, limit: usize) -> Self {
        self.max_content_bytes = limit;
        self
    }

    /// Scan content for the policy's entities and redact them.
    ///
    /// Detection repeats over the redacted text until it finds nothing new,
    /// so a candidate clipped by an overlapping winner is picked up on a
    /// later pass. Findings always carry spans into `content`.
    pub fn scan_and_redact(&self, content: &str, policy: &Policy) -> Result<RedactionResult> {
        if content.len() > self.max_content_bytes {
            return Err(Error::Scan(format!(
                "Content of {} bytes exceeds limit of {} bytes",
                content.len(),
                self.max_content_bytes
            )));
        }

        let matchers = resolve_matchers(policy);
        if matchers.is_empty() {
            return Ok(RedactionResult {
                sanitized_data: content.to_string(),
                findings: Vec::new(),
            });
        }

        let mut findings = self.detect(content, &matchers, policy)?;
        let mut redacted = apply_redactions(content, &findings);
        let mut passes = 1;
        loop {
            let extra = self.detect(&redacted, &matchers, policy)?;
            if extra.is_empty() {
                break;
            }
            if passes == MAX_DETECTION_PASSES {
                tracing::warn!(
                    remaining = extra.len(),
                    "PII detection did not settle, returning partial redaction"
                );
                break;
            }
            let mapped: Vec<Finding> = extra
                .into_iter()
                .map(|f| Finding {
                    start: original_offset(&findings, f.start),
                    end: original_offset(&findings, f.end),
                    ..f
                })
                .collect();
            findings.extend(mapped);
            findings.sort_by_key(|f| f.start);
            redacted = apply_redactions(content, &findings);
            passes += 1;
        }

        let sanitized_data = if policy.pii_redact {
            redacted
        } else {
            content.to_string()
        };

        if !findings.is_empty() {
            tracing::debug!(
                findings = findings.len(),
                passes,
                redacted = policy.pii_redact,
                "PII detected in output"
            );
        }

        Ok(RedactionResult {
            sanitized_data,
            findings,
        })
    }

    /// One detection pass: collect candidates from every matcher and keep
    /// the longest non-overlapping ones.
    fn detect(
        &self,
        content: &str,
        matchers: &[Matcher<'_>],
        policy: &Policy,
    ) -> Result<Vec<Finding>> {
        let protected: Vec<Range<usize>> =
            self.marker.find_iter(content).map(|m| m.range()).collect();

        let mut candidates = Vec::new();
        for (order, matcher) in matchers.iter().enumerate() {
            match matcher {
                Matcher::BuiltIn(entity) => {
                    let regex = self.builtin_regex(*entity)?;
                    for m in regex.find_iter(content) {
                        if entity.validate(m.as_str()) {
                            candidates.push(Candidate {
                                entity: entity.name().to_string(),
                                range: m.range(),
                                score: entity.score(),
                                order,
                            });
                        }
                    }
                }
                Matcher::Custom(pattern) => {
                    for regex in &pattern.expressions {
                        for m in regex.find_iter(content) {
                            if !self.has_context(pattern, content, m.range()) {
                                continue;
                            }
                            candidates.push(Candidate {
                                entity: pattern.name.clone(),
                                range: m.range(),
                                score: pattern.score,
                                order,
                            });
                        }
                    }
                }
            }
        }

        candidates.retain(|c| {
            !c.range.is_empty()
                && c.score >= policy.pii_threshold
                && !protected.iter().any(|p| overlaps(p, &c.range))
        });

        Ok(select_longest(candidates))
    }

    fn builtin_regex(&self, entity: BuiltInEntity) -> Result<&Regex> {
        self.builtins
            .iter()
            .find(|(e, _)| *e == entity)
            .map(|(_, re)| re)
            .ok_or_else(|| Error::Scan(format!("No detector compiled for {}", entity)))
    }

    /// A custom match qualifies when the pattern has no context keywords or
    /// when a keyword appears within `CONTEXT_WINDOW_WORDS` words before or
    /// after the match. The match itself and redaction markers never count.
    fn has_context(&self, pattern: &CustomPattern, content: &str, span: Range<usize>) -> bool {
        if pattern.context.is_empty() {
            return true;
        }
        let before: Vec<&str> = content[..span.start]
            .split_whitespace()
            .rev()
            .take(CONTEXT_WINDOW_WORDS)
            .collect();
        let after = content[span.end..]
            .split_whitespace()
            .take(CONTEXT_WINDOW_WORDS);

        before
            .into_iter()
            .chain(after)
            .filter(|word| !self.marker.is_match(word))
            .map(str::to_lowercase)
            .any(|word| pattern.context.iter().any(|k| word.contains(k.as_str())))
    }
}

fn overlaps(a: &Range<usize>, b: &Range<usize>) -> bool {
    a.start < b.end && b.start < a.end
}

/// Map an offset in text redacted with `findings` back to the original
/// content. Offsets inside a marker map to the start of its span.
fn original_offset(findings: &[Finding], pos: usize) -> usize {
    let (mut original, mut redacted) = (0, 0);
    for f in findings {
        let gap = f.start - original;
        let marker_len = redaction_marker(&f.entity).len();
        if pos <= redacted + gap {
            return original + (pos - redacted);
        }
        if pos < redacted + gap + marker_len {
            return f.start;
        }
        redacted += gap + marker_len;
        original = f.end;
    }
    original + (pos - redacted)
}

/// Keep the longest candidate at each start offset and drop anything that
/// overlaps an earlier selection. Ties go to the matcher listed first.
fn select_longest(mut candidates: Vec<Candidate>) -> Vec<Finding> {
    candidates.sort_by(|a, b| {
        a.range
            .start
            .cmp(&b.range.start)
            .then(b.range.len().cmp(&a.range.len()))
            .then(a.order.cmp(&b.order))
    });

    let mut findings: Vec<Finding> = Vec::new();
    let mut covered_until = 0;
    for c in candidates {
        if !findings.is_empty() && c.range.start < covered_until {
            continue;
        }
        covered_until = c.range.end;
        findings.push(Finding {
            entity: c.entity,
            start: c.range.start,
            end: c.range.end,
            score: c.score,
        });
    }
    findings
}

/// Replace each finding with its marker. Findings must be ascending and
/// non-overlapping.
fn apply_redactions(content: &str, findings: &[Finding]) -> String {
    let mut out = String::with_capacity(content.len());
    let mut last = 0;
    for f in findings {
        out.push_str(&content[last..f.start]);
        out.push_str(&redaction_marker(&f.entity));
        last = f.end;
    }
    out.push_str(&content[last..]);
    out
}

fn luhn_valid(text: &str) -> bool {
    let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=19).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn iban_valid(text: &str) -> bool {
    let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    if !compact.is_ascii() || !(15..=34).contains(&compact.len()) {
        return false;
    }
    let (head, tail) = compact.split_at(4);
    let mut remainder: u32 = 0;
    for c in tail.chars().chain(head.chars()) {
        let value = match c.to_digit(36) {
            Some(v) => v,
            None => return false,
        };
        remainder = if value >= 10 {
            (remainder * 100 + value) % 97
        } else {
            (remainder * 10 + value) % 97
        };
    }
    remainder == 1
}

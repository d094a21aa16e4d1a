//! Prompt injection scoring
//!
//! Evaluates incoming text against heuristic rules that recognise attempts
//! to override system instructions, extract internal context, break out of
//! the chat template, or smuggle instructions in encoded form. Each rule
//! carries a weight; the weights of all matched rules are combined with a
//! noisy-OR into a single score in `[0, 1]`:
//!
//! ```text
//! score = 1 - Π (1 - weight_i)
//! ```
//!
//! Content passes only when `score < threshold`. A score equal to the
//! threshold is a failure.

use crate::error::{Error, Result};
use crate::policy::Policy;
use base64::Engine;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Category of injection heuristic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionCategory {
    /// Attempt to override system role or instructions
    RoleOverride,
    /// Attempt to extract system prompt or context
    DataExtraction,
    /// Use of special delimiters to break out of user context
    DelimiterInjection,
    /// Encoded instructions (base64)
    EncodingTrick,
    /// Attempt to make the agent ignore safety rules
    SafetyBypass,
    /// Fake system/assistant turn inside user content
    SystemImpersonation,
}

/// Verdict for one incoming-content scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanVerdict {
    pub is_valid: bool,
    pub score: f64,
    /// Ids of every rule that contributed, in evaluation order
    pub matched_rules: Vec<String>,
    /// Scanner disabled by policy; nothing was evaluated
    #[serde(default)]
    pub bypassed: bool,
}

impl ScanVerdict {
    /// Verdict returned when the scanner is disabled.
    pub fn bypass() -> Self {
        Self {
            is_valid: true,
            score: 0.0,
            matched_rules: Vec::new(),
            bypassed: true,
        }
    }
}

struct RuleDef {
    id: &'static str,
    category: InjectionCategory,
    pattern: &'static str,
    weight: f64,
}

/// Built-in heuristics, in evaluation order
const RULES: &[RuleDef] = &[
    RuleDef {
        id: "instruction_override",
        category: InjectionCategory::RoleOverride,
        pattern: r"(?i)\b(ignore|disregard|forget|override|skip)\b[\s\w,]{0,30}?\b(previous|prior|above|earlier|preceding|your|the|all|any)\s+(instructions?|prompts?|rules|directions|guidelines|context)\b",
        weight: 0.9,
    },
    RuleDef {
        id: "system_prompt_extraction",
        category: InjectionCategory::DataExtraction,
        pattern: r"(?i)\b(reveal|show|print|repeat|output|display|leak|dump|tell\s+me|what\s+(is|are))\b[\s\w,]{0,30}?\b(system|hidden|initial|original|secret)\s+(prompt|instructions?|message|rules)\b",
        weight: 0.85,
    },
    RuleDef {
        id: "context_dump",
        category: InjectionCategory::DataExtraction,
        pattern: r"(?i)\b(repeat|print|output|show)\s+(everything|all(\s+the)?\s+(text|context))\s+(above|before)\b",
        weight: 0.7,
    },
    RuleDef {
        id: "privileged_mode",
        category: InjectionCategory::RoleOverride,
        pattern: r"(?i)\b(developer|jailbreak|dan|god|unrestricted|unfiltered)\s+mode\b",
        weight: 0.8,
    },
    RuleDef {
        id: "safety_bypass",
        category: InjectionCategory::SafetyBypass,
        pattern: r"(?i)\b(bypass|disable|turn\s+off|circumvent|deactivate)\s+(your\s+|the\s+|all\s+|any\s+)?(safety|content\s+filters?|guardrails|restrictions|filters|moderation)\b",
        weight: 0.8,
    },
    RuleDef {
        id: "unrestricted_roleplay",
        category: InjectionCategory::SafetyBypass,
        pattern: r"(?i)\b(pretend|act\s+as\s+if|imagine)\b[\s\w]{0,20}?\b(no|without\s+any|without)\s+(restrictions|rules|limits|guidelines|filters)\b",
        weight: 0.75,
    },
    RuleDef {
        id: "delimiter_injection",
        category: InjectionCategory::DelimiterInjection,
        pattern: r"(?i)(</s>|<\|endoftext\|>|<\|im_start\|>|<\|im_end\|>|<<sys>>|<</sys>>|\[/?inst\])",
        weight: 0.7,
    },
    RuleDef {
        id: "new_instructions",
        category: InjectionCategory::RoleOverride,
        pattern: r"(?i)\bnew\s+(instructions|rules|task)\s*:",
        weight: 0.5,
    },
    RuleDef {
        id: "system_impersonation",
        category: InjectionCategory::SystemImpersonation,
        pattern: r"(?im)^\s*(system|assistant|admin(istrator)?)\s*:",
        weight: 0.35,
    },
    RuleDef {
        id: "role_reassignment",
        category: InjectionCategory::RoleOverride,
        pattern: r"(?i)\b(you\s+are\s+now|from\s+now\s+on,?\s+you|pretend\s+to\s+be)\b",
        weight: 0.3,
    },
];

/// Rule id reported for base64 payloads that decode to an injection
const ENCODED_PAYLOAD_RULE: &str = "encoded_payload";
const ENCODED_PAYLOAD_WEIGHT: f64 = 0.9;

/// Rules at or above this weight are searched for inside decoded payloads
const STRONG_RULE_WEIGHT: f64 = 0.7;

struct CompiledRule {
    id: &'static str,
    category: InjectionCategory,
    regex: Regex,
    weight: f64,
}

/// Prompt injection scorer.
///
/// Rules are compiled once; the threshold and on/off switch come from the
/// policy passed to each call.
pub struct InjectionScorer {
    rules: Vec<CompiledRule>,
    base64_block: Regex,
    max_content_bytes: usize,
}

impl InjectionScorer {
    /// Compile the built-in rules.
    pub fn new() -> Result<Self> {
        let rules = RULES
            .iter()
            .map(|def| {
                let regex = Regex::new(def.pattern).map_err(|e| {
                    Error::Scan(format!("Invalid built-in rule '{}': {}", def.id, e))
                })?;
                Ok(CompiledRule {
                    id: def.id,
                    category: def.category,
                    regex,
                    weight: def.weight,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let base64_block = Regex::new(r"[A-Za-z0-9+/]{20,}={0,2}")
            .map_err(|e| Error::Scan(format!("Invalid base64 pattern: {}", e)))?;

        Ok(Self {
            rules,
            base64_block,
            max_content_bytes: usize::MAX,
        })
    }

    /// Reject content larger than `limit` bytes with `Error::Scan`.
    pub fn with_max_content_bytes(mut self, limit: usize) -> Self {
        self.max_content_bytes = limit;
        self
    }

    /// Score content under the given policy.
    pub fn score(&self, content: &str, policy: &Policy) -> Result<ScanVerdict> {
        if !policy.enabled_injection_scanner {
            return Ok(ScanVerdict::bypass());
        }
        if content.len() > self.max_content_bytes {
            return Err(Error::Scan(format!(
                "Content of {} bytes exceeds limit of {} bytes",
                content.len(),
                self.max_content_bytes
            )));
        }

        let mut matched_rules = Vec::new();
        let mut weights = Vec::new();
        let mut categories = Vec::new();

        for rule in &self.rules {
            if rule.regex.is_match(content) {
                matched_rules.push(rule.id.to_string());
                weights.push(rule.weight);
                categories.push(rule.category);
            }
        }

        if self.contains_encoded_payload(content) {
            matched_rules.push(ENCODED_PAYLOAD_RULE.to_string());
            weights.push(ENCODED_PAYLOAD_WEIGHT);
            categories.push(InjectionCategory::EncodingTrick);
        }

        let score = combine(&weights);
        let is_valid = score < policy.injection_threshold;

        if !is_valid {
            tracing::debug!(
                score,
                threshold = policy.injection_threshold,
                rules = ?matched_rules,
                categories = ?categories,
                "Injection threshold reached"
            );
        }

        Ok(ScanVerdict {
            is_valid,
            score,
            matched_rules,
            bypassed: false,
        })
    }

    /// Look for base64 blocks whose decoded text trips a strong rule.
    fn contains_encoded_payload(&self, content: &str) -> bool {
        for m in self.base64_block.find_iter(content) {
            let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(m.as_str()) else {
                continue;
            };
            let Ok(text) = String::from_utf8(decoded) else {
                continue;
            };
            if self
                .rules
                .iter()
                .filter(|r| r.weight >= STRONG_RULE_WEIGHT)
                .any(|r| r.regex.is_match(&text))
            {
                return true;
            }
        }
        false
    }
}

/// Noisy-OR combination of rule weights, clamped to `[0, 1]`.
fn combine(weights: &[f64]) -> f64 {
    let miss: f64 = weights
        .iter()
        .map(|w| 1.0 - w.clamp(0.0, 1.0))
        .product();
    (1.0 - miss).clamp(0.0, 1.0)
}

//! Policy document and validated policy snapshot
//!
//! The document uses the key names of the policy file (`config.json`):
//!
//! ```json
//! {
//!   "enable_prompt_injection_scanner": true,
//!   "prompt_injection_threshold": 0.5,
//!   "pii_entities_to_scan": ["EMAIL_ADDRESS", "GENERIC_SECRET"],
//!   "custom_regex_patterns": [
//!     {"name": "GENERIC_SECRET", "expressions": ["SECRET-[A-Z-]*"],
//!      "context": ["secret"], "score": 0.8}
//!   ]
//! }
//! ```

use super::source::{PolicyFormat, RawPolicy};
use crate::error::{Error, Result};
use crate::scanner::pii::BuiltInEntity;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Compiled size limit for operator-supplied expressions
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

fn default_true() -> bool {
    true
}

fn default_injection_threshold() -> f64 {
    0.9
}

fn default_pii_threshold() -> f64 {
    0.5
}

fn default_pattern_score() -> f64 {
    0.5
}

/// Policy document as written by operators
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDocument {
    #[serde(default = "default_true")]
    pub enable_prompt_injection_scanner: bool,

    #[serde(default = "default_injection_threshold")]
    pub prompt_injection_threshold: f64,

    #[serde(default)]
    pub pii_entities_to_scan: Vec<String>,

    #[serde(default)]
    pub custom_regex_patterns: Vec<CustomPatternDef>,

    /// Replace findings in the output (false = report only)
    #[serde(default = "default_true")]
    pub pii_scan_redact: bool,

    /// Findings scoring below this are discarded
    #[serde(default = "default_pii_threshold")]
    pub pii_scan_threshold: f64,
}

impl Default for PolicyDocument {
    fn default() -> Self {
        Self {
            enable_prompt_injection_scanner: true,
            prompt_injection_threshold: default_injection_threshold(),
            pii_entities_to_scan: Vec::new(),
            custom_regex_patterns: Vec::new(),
            pii_scan_redact: true,
            pii_scan_threshold: default_pii_threshold(),
        }
    }
}

/// A custom regex pattern group as written in the document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomPatternDef {
    pub name: String,
    pub expressions: Vec<String>,
    #[serde(default)]
    pub context: Vec<String>,
    #[serde(default = "default_pattern_score")]
    pub score: f64,
}

impl PolicyDocument {
    /// Parse a document in the given format.
    pub fn parse(content: &str, format: PolicyFormat) -> Result<Self> {
        match format {
            PolicyFormat::Json => serde_json::from_str(content)
                .map_err(|e| Error::Config(format!("Malformed JSON policy: {}", e))),
            PolicyFormat::Yaml => serde_yaml::from_str(content)
                .map_err(|e| Error::Config(format!("Malformed YAML policy: {}", e))),
            PolicyFormat::Toml => toml::from_str(content)
                .map_err(|e| Error::Config(format!("Malformed TOML policy: {}", e))),
        }
    }

    /// Validate and compile into a policy snapshot.
    pub fn compile(self, digest: String) -> Result<Policy> {
        check_unit_interval("prompt_injection_threshold", self.prompt_injection_threshold)?;
        check_unit_interval("pii_scan_threshold", self.pii_scan_threshold)?;

        let custom_patterns = self
            .custom_regex_patterns
            .into_iter()
            .map(CustomPattern::compile)
            .collect::<Result<Vec<_>>>()?;

        let mut pii_entities: Vec<String> = Vec::new();
        for name in self.pii_entities_to_scan {
            let name = name.trim().to_string();
            if !name.is_empty() && !pii_entities.contains(&name) {
                pii_entities.push(name);
            }
        }

        Ok(Policy {
            enabled_injection_scanner: self.enable_prompt_injection_scanner,
            injection_threshold: self.prompt_injection_threshold,
            pii_entities,
            custom_patterns,
            pii_redact: self.pii_scan_redact,
            pii_threshold: self.pii_scan_threshold,
            digest,
        })
    }
}

fn check_unit_interval(key: &str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::Config(format!("{} must be within [0, 1], got {}", key, value)))
    }
}

/// A validated custom pattern with compiled expressions
#[derive(Debug, Clone)]
pub struct CustomPattern {
    pub name: String,
    pub expressions: Vec<Regex>,
    /// Lowercased context keywords
    pub context: Vec<String>,
    pub score: f64,
}

impl CustomPattern {
    fn compile(def: CustomPatternDef) -> Result<Self> {
        let name = def.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::Config("Custom pattern with empty name".to_string()));
        }
        if def.expressions.is_empty() {
            return Err(Error::Config(format!(
                "Custom pattern '{}' has no expressions",
                name
            )));
        }
        check_unit_interval(&format!("custom pattern '{}' score", name), def.score)?;

        let expressions = def
            .expressions
            .iter()
            .map(|expr| {
                RegexBuilder::new(expr)
                    .size_limit(PATTERN_SIZE_LIMIT)
                    .build()
                    .map_err(|e| {
                        Error::Config(format!(
                            "Invalid regex pattern for '{}': {}",
                            name, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        let context = def
            .context
            .iter()
            .map(|c| c.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();

        Ok(Self {
            name,
            expressions,
            context,
            score: def.score,
        })
    }
}

/// Current snapshot of detection rules
///
/// Rebuilt from the policy source on every checkpoint call; carries the
/// digest of the document it came from.
#[derive(Debug, Clone)]
pub struct Policy {
    pub enabled_injection_scanner: bool,
    pub injection_threshold: f64,
    /// Entity names to scan, in document order, deduplicated
    pub pii_entities: Vec<String>,
    pub custom_patterns: Vec<CustomPattern>,
    pub pii_redact: bool,
    pub pii_threshold: f64,
    /// Hex SHA-256 of the source document
    pub digest: String,
}

impl Policy {
    /// Parse, validate and compile a raw document.
    pub fn from_raw(raw: &RawPolicy) -> Result<Self> {
        let document = PolicyDocument::parse(&raw.content, raw.format)?;
        document.compile(digest_of(&raw.content))
    }

    /// Conservative policy used until the first successful load.
    pub fn bootstrap() -> Self {
        Self {
            enabled_injection_scanner: true,
            injection_threshold: 0.5,
            pii_entities: BuiltInEntity::ALL
                .iter()
                .map(|e| e.name().to_string())
                .collect(),
            custom_patterns: Vec::new(),
            pii_redact: true,
            pii_threshold: default_pii_threshold(),
            digest: "bootstrap".to_string(),
        }
    }

    /// Look up an active custom pattern by name.
    pub fn custom_pattern(&self, name: &str) -> Option<&CustomPattern> {
        self.custom_patterns.iter().find(|p| p.name == name)
    }
}

/// Hex SHA-256 of a policy document
pub fn digest_of(content: &str) -> String {
    format!("{:x}", Sha256::digest(content.as_bytes()))
}

//! Command normalizer for raw interpretation-service output.
//!
//! The model is asked for a JSON array of `{"action": ..., ...}` objects, but
//! it often wraps the array in prose or code fences. The normalizer walks an
//! ordered chain of extraction strategies and stops at the first one that
//! yields valid JSON:
//!
//! 1. the whole text parsed directly
//! 2. the interior of a ```` ```json ```` fence
//! 3. the interior of any ```` ``` ```` fence
//! 4. the first `[` … last `]` span
//!
//! Strategies are never combined. The direct parse always runs first, so a
//! valid array that merely contains a stray bracket inside a string is not
//! truncated by the bracket search.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Reserved field naming the command.
pub const ACTION_FIELD: &str = "action";

static TAGGED_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```json\s*(.*?)\s*```").unwrap());
static ANY_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*\s*(.*?)\s*```").unwrap());
static BRACKET_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\[.*\]").unwrap());

// ---------------------------------------------------------------------------
// StructuredCommand
// ---------------------------------------------------------------------------

/// One command record produced by the interpretation service.
///
/// Usually a JSON object with an `action` key; every other key is opaque to
/// the engine and interpreted by the plugin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StructuredCommand(Value);

impl StructuredCommand {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    /// The action name, when it is a non-empty string.
    pub fn action(&self) -> Option<&str> {
        self.0
            .get(ACTION_FIELD)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    /// Field lookup; `None` for non-object commands.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl From<Value> for StructuredCommand {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

/// Which extraction strategy produced the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    Direct,
    TaggedFence,
    Fence,
    BracketSpan,
}

impl fmt::Display for ExtractionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Direct => "direct",
            Self::TaggedFence => "tagged_fence",
            Self::Fence => "fence",
            Self::BracketSpan => "bracket_span",
        };
        f.write_str(s)
    }
}

/// Successfully normalized output.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    /// Commands in the order the service produced them. May be empty.
    pub commands: Vec<StructuredCommand>,
    pub strategy: ExtractionStrategy,
    /// The untouched raw text, kept for audit.
    pub raw: String,
}

/// Every strategy failed.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub struct NormalizeError {
    pub reason: String,
    /// The untouched raw text, kept for diagnostics.
    pub raw: String,
}

// ---------------------------------------------------------------------------
// normalize
// ---------------------------------------------------------------------------

/// Turn raw interpretation output into an ordered command batch.
pub fn normalize(raw: &str) -> Result<NormalizedBatch, NormalizeError> {
    if let Some(commands) = parse_commands(raw) {
        return Ok(batch(raw, commands, ExtractionStrategy::Direct));
    }

    if let Some(commands) = capture(&TAGGED_FENCE, raw, 1).and_then(parse_commands) {
        return Ok(batch(raw, commands, ExtractionStrategy::TaggedFence));
    }

    if let Some(commands) = capture(&ANY_FENCE, raw, 1).and_then(parse_commands) {
        return Ok(batch(raw, commands, ExtractionStrategy::Fence));
    }

    if let Some(commands) = capture(&BRACKET_SPAN, raw, 0).and_then(parse_commands) {
        return Ok(batch(raw, commands, ExtractionStrategy::BracketSpan));
    }

    Err(NormalizeError {
        reason: if raw.trim().is_empty() {
            "Interpretation service returned an empty response".to_string()
        } else {
            "Failed to parse structured commands from interpretation output".to_string()
        },
        raw: raw.to_string(),
    })
}

fn batch(raw: &str, commands: Vec<StructuredCommand>, strategy: ExtractionStrategy) -> NormalizedBatch {
    log::debug!(
        "Normalized {} command(s) via {} strategy",
        commands.len(),
        strategy
    );
    NormalizedBatch {
        commands,
        strategy,
        raw: raw.to_string(),
    }
}

fn capture<'a>(re: &Regex, text: &'a str, group: usize) -> Option<&'a str> {
    re.captures(text)
        .and_then(|caps| caps.get(group))
        .map(|m| m.as_str().trim())
}

/// Parse a candidate into commands. Arrays map 1:1; a lone object is a
/// one-command batch; anything else is rejected.
fn parse_commands(candidate: &str) -> Option<Vec<StructuredCommand>> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Array(items) => Some(items.into_iter().map(StructuredCommand).collect()),
        obj @ Value::Object(_) => Some(vec![StructuredCommand(obj)]),
        _ => None,
    }
}

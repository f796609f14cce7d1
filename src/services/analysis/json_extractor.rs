//! JSON Extractor
//!
//! Turns raw completion text into a JSON object using a fixed repair ladder.
//! The first rung that yields an object wins:
//!
//! 1. parse the full text
//! 2. strip a leading and trailing code fence
//! 3. slice from the first `{` to its matching `}` (brace-depth scan)
//! 4. drop one dangling comma before the final `}` of that slice
//!
//! Rungs 3 and 4 run on the unfenced text first, then on the original text.
//!
//! Anything else is reported as [`ExtractionError`]; no other repairs are
//! attempted.

use serde_json::Value;
use thiserror::Error;

/// Characters of raw text kept in an error excerpt.
const EXCERPT_CHARS: usize = 200;

/// The rung of the repair ladder that produced (or last failed) a parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepairRung {
    Direct = 1,
    StripFences = 2,
    BraceSlice = 3,
    TrailingComma = 4,
}

impl RepairRung {
    pub fn number(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            RepairRung::Direct => "direct",
            RepairRung::StripFences => "strip_fences",
            RepairRung::BraceSlice => "brace_slice",
            RepairRung::TrailingComma => "trailing_comma",
        }
    }
}

impl std::fmt::Display for RepairRung {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "rung {} ({})", self.number(), self.label())
    }
}

/// A successfully extracted object and the rung that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub value: Value,
    pub rung: RepairRung,
}

/// Raised when no rung yields a JSON object.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("unable to extract JSON object at {failure_point}: {reason}")]
pub struct ExtractionError {
    /// Leading slice of the raw text
    pub raw_excerpt: String,
    /// Last rung attempted
    pub failure_point: RepairRung,
    /// Parser message from the last rung
    pub reason: String,
}

/// Run the repair ladder over `raw`.
pub fn extract(raw: &str) -> Result<Extraction, ExtractionError> {
    let fail = |rung: RepairRung, reason: String| ExtractionError {
        raw_excerpt: excerpt(raw),
        failure_point: rung,
        reason,
    };

    if raw.trim().is_empty() {
        return Err(fail(RepairRung::Direct, "empty completion".to_string()));
    }

    let mut reason = match parse_object(raw) {
        Ok(value) => return Ok(success(value, RepairRung::Direct)),
        Err(e) => e,
    };

    let trimmed = raw.trim();
    let unfenced = strip_fences(raw);
    if unfenced != trimmed {
        match parse_object(unfenced) {
            Ok(value) => return Ok(success(value, RepairRung::StripFences)),
            Err(e) => reason = e,
        }
    }

    // Slice and comma repair run on the unfenced text, then on the original.
    let mut failure_point = RepairRung::BraceSlice;
    let mut candidates = vec![unfenced];
    if unfenced != trimmed {
        candidates.push(trimmed);
    }
    for candidate in candidates {
        let Some(sliced) = brace_slice(candidate) else {
            continue;
        };
        match parse_object(sliced) {
            Ok(value) => return Ok(success(value, RepairRung::BraceSlice)),
            Err(e) => reason = e,
        }
        if let Some(repaired) = strip_trailing_comma(sliced) {
            match parse_object(&repaired) {
                Ok(value) => return Ok(success(value, RepairRung::TrailingComma)),
                Err(e) => reason = e,
            }
        }
        failure_point = RepairRung::TrailingComma;
    }

    if failure_point == RepairRung::BraceSlice {
        reason = "no complete object delimited by braces".to_string();
    }
    Err(fail(failure_point, reason))
}

fn success(value: Value, rung: RepairRung) -> Extraction {
    if rung != RepairRung::Direct {
        tracing::debug!(rung = rung.number(), "json recovered by repair ladder");
    }
    Extraction { value, rung }
}

fn parse_object(text: &str) -> Result<Value, String> {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(other) => Err(format!("expected a JSON object, found {}", kind_name(&other))),
        Err(e) => Err(e.to_string()),
    }
}

fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Trimmed text without a leading ```` ```lang ```` line or a trailing
/// ```` ``` ````. Fences anywhere else are left alone.
fn strip_fences(text: &str) -> &str {
    let mut body = text.trim();
    if let Some(after_open) = body.strip_prefix("```") {
        // language tag such as `json`
        body = after_open
            .trim_start_matches(|c: char| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    }
    if let Some(before_close) = body.trim_end().strip_suffix("```") {
        body = before_close;
    }
    body.trim()
}

/// Slice from the first `{` to the brace that closes it.
///
/// Braces inside string literals are ignored. When the text never closes the
/// first brace, the slice ends at the last `}` instead.
fn brace_slice(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth: usize = 0;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Remove a single `,` directly before the final `}`.
fn strip_trailing_comma(text: &str) -> Option<String> {
    let body = text.trim_end().strip_suffix('}')?;
    let head = body.trim_end().strip_suffix(',')?;
    Some(format!("{}}}", head))
}

fn excerpt(raw: &str) -> String {
    raw.chars().take(EXCERPT_CHARS).collect()
}

//! Secret Redaction
//!
//! Masks credentials that may leak into provider error bodies before a
//! message is logged or sent to a caller.

use regex::Regex;
use std::sync::OnceLock;

const MASK: &str = "[redacted]";

fn secret_patterns() -> &'static Vec<Regex> {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            // OpenAI keys
            r"sk-[A-Za-z0-9_\-]{16,}",
            // Google API keys
            r"AIza[0-9A-Za-z_\-]{20,}",
            // Bearer tokens and key query parameters
            r"(?i)bearer\s+[A-Za-z0-9._\-]{16,}",
            r"(?i)([?&]key=)[^&\s]+",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

/// Replace anything that looks like a credential with a fixed mask.
pub fn redact_secrets(text: &str) -> String {
    let mut out = text.to_string();
    for pattern in secret_patterns() {
        out = pattern
            .replace_all(&out, |caps: &regex::Captures| match caps.get(1) {
                Some(prefix) => format!("{}{}", prefix.as_str(), MASK),
                None => MASK.to_string(),
            })
            .into_owned();
    }
    out
}

//! Gemini SSE Stream Adapter
//!
//! Handles `streamGenerateContent?alt=sse` chunks. Every chunk is a full
//! `GenerateContentResponse` carrying only the newly generated parts.

use market_lens_core::streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiChunk {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    error: Option<ErrorBody>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
    #[serde(default)]
    status: Option<String>,
}

/// Adapter for Gemini SSE format
pub struct GeminiAdapter {
    model: String,
    /// Usage is repeated on every chunk; only the last one is reported.
    last_usage: Option<(u32, u32)>,
}

impl GeminiAdapter {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            last_usage: None,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl StreamAdapter for GeminiAdapter {
    fn provider_name(&self) -> &'static str {
        "gemini"
    }

    fn adapt(&mut self, input: &str) -> Result<Vec<UnifiedStreamEvent>, AdapterError> {
        let trimmed = input.trim();

        let json_str = match trimmed.strip_prefix("data:") {
            Some(rest) => rest.trim_start(),
            None if trimmed.is_empty() || trimmed.starts_with(':') => return Ok(vec![]),
            None => trimmed,
        };

        if json_str.is_empty() {
            return Ok(vec![]);
        }

        let chunk: GeminiChunk =
            serde_json::from_str(json_str).map_err(|e| AdapterError::ParseError(e.to_string()))?;

        if let Some(err) = chunk.error {
            return Ok(vec![UnifiedStreamEvent::Error {
                message: err.message,
                code: err.status,
            }]);
        }

        let mut events = Vec::new();
        let mut finish = None;

        for candidate in chunk.candidates {
            if let Some(content) = candidate.content {
                for text in content.parts.into_iter().filter_map(|p| p.text) {
                    if !text.is_empty() {
                        events.push(UnifiedStreamEvent::TextDelta { content: text });
                    }
                }
            }
            if candidate.finish_reason.is_some() {
                finish = candidate.finish_reason;
            }
        }

        if let Some(usage) = chunk.usage_metadata {
            self.last_usage = Some((usage.prompt_token_count, usage.candidates_token_count));
        }

        if let Some(reason) = finish {
            if let Some((input_tokens, output_tokens)) = self.last_usage.take() {
                events.push(UnifiedStreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                });
            }
            events.push(UnifiedStreamEvent::Complete {
                stop_reason: Some(reason),
            });
        }

        Ok(events)
    }

    fn reset(&mut self) {
        self.last_usage = None;
    }
}

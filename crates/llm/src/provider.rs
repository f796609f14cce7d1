//! LLM Provider Trait
//!
//! Defines the common interface for all LLM providers, plus the helpers the
//! network providers share: HTTP error mapping, SSE draining and output token
//! budgeting.

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use super::types::{
    CompletionOptions, LlmError, LlmResponse, LlmResult, ProviderConfig, ProviderType,
    StopReason, UsageStats,
};
use market_lens_core::analysis::PromptBundle;
use market_lens_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Trait that all LLM providers must implement.
///
/// One call to [`LlmProvider::complete`] is one attempt. Text increments are
/// pushed into `tx` as they arrive; the returned response carries the full
/// text (or a structured payload for local providers).
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Returns the provider name for identification.
    fn name(&self) -> &'static str;

    /// Returns the provider kind.
    fn provider_type(&self) -> ProviderType;

    /// Returns the current model being used.
    fn model(&self) -> &str;

    /// Whether the provider runs in-process without network access.
    ///
    /// Local providers are never skipped for lack of time budget.
    fn is_local(&self) -> bool {
        false
    }

    /// Whether the provider can negotiate a native JSON output mode.
    fn supports_structured_output(&self) -> bool {
        true
    }

    /// Produce one completion for the prompt.
    async fn complete(
        &self,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse>;

    /// Get the configuration for this provider.
    fn config(&self) -> &ProviderConfig;
}

/// Helper function to create an error for missing API key
pub fn missing_api_key_error(provider: &str) -> LlmError {
    LlmError::AuthenticationFailed {
        message: format!("API key not configured for {}", provider),
    }
}

/// Markers that identify a refused JSON-mode request in a 400 body.
const STRUCTURED_OUTPUT_MARKERS: &[&str] = &[
    "response_format",
    "json_object",
    "responsemimetype",
    "response_mime_type",
    "generation_config",
    "generationconfig",
];

/// Helper function to parse HTTP error status codes
pub fn parse_http_error(status: u16, body: &str, provider: &str) -> LlmError {
    match status {
        401 => LlmError::AuthenticationFailed {
            message: format!("{}: Invalid API key", provider),
        },
        403 => LlmError::AuthenticationFailed {
            message: format!("{}: Access denied", provider),
        },
        404 => LlmError::ModelNotFound {
            model: body.to_string(),
        },
        408 => LlmError::Timeout {
            message: format!("{}: request timeout", provider),
        },
        429 => LlmError::RateLimited {
            message: body.to_string(),
            retry_after: None,
        },
        400 => {
            let lower = body.to_lowercase();
            if STRUCTURED_OUTPUT_MARKERS.iter().any(|m| lower.contains(m)) {
                LlmError::StructuredOutputRejected {
                    message: body.to_string(),
                }
            } else {
                LlmError::InvalidRequest {
                    message: body.to_string(),
                }
            }
        }
        500..=599 => LlmError::ServerError {
            message: body.to_string(),
            status: Some(status),
        },
        _ => LlmError::Other {
            message: format!("HTTP {}: {}", status, body),
        },
    }
}

/// Read `Retry-After` (seconds) from a response, if present.
pub fn retry_after_header(response: &reqwest::Response) -> Option<u32> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u32>().ok())
}

/// Turn a non-success response into an [`LlmError`].
pub async fn error_from_response(response: reqwest::Response, provider: &str) -> LlmError {
    let status = response.status().as_u16();
    let retry_after = retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();
    match parse_http_error(status, &body, provider) {
        LlmError::RateLimited { message, .. } => LlmError::RateLimited {
            message,
            retry_after,
        },
        other => other,
    }
}

// ============================================================================
// SSE draining
// ============================================================================

/// Text and bookkeeping accumulated while draining a stream.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    pub content: String,
    pub usage: UsageStats,
    pub stop_reason: Option<StopReason>,
}

impl StreamAccumulator {
    pub fn into_response(self, model: &str) -> LlmResponse {
        LlmResponse {
            content: if self.content.is_empty() {
                None
            } else {
                Some(self.content)
            },
            structured: None,
            stop_reason: self.stop_reason.unwrap_or(StopReason::EndTurn),
            usage: self.usage,
            model: model.to_string(),
        }
    }
}

/// Drain an SSE body through `adapter`, forwarding text deltas to `tx`.
///
/// Lines are split on raw bytes so multi-byte characters spanning two
/// network chunks are decoded intact. An in-stream error event ends the
/// attempt with [`LlmError::ServerError`].
pub async fn drain_sse<A: StreamAdapter>(
    response: reqwest::Response,
    adapter: &mut A,
    tx: &mpsc::Sender<UnifiedStreamEvent>,
) -> LlmResult<StreamAccumulator> {
    let mut acc = StreamAccumulator::default();
    let mut stream = response.bytes_stream();
    let mut buffer: Vec<u8> = Vec::new();

    adapter.reset();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        buffer.extend_from_slice(&chunk);

        while let Some(line_end) = buffer.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = buffer.drain(..=line_end).collect();
            let line = String::from_utf8_lossy(&line_bytes);
            handle_line(adapter, &line, &mut acc, tx).await?;
        }
    }

    if !buffer.is_empty() {
        let line = String::from_utf8_lossy(&buffer).into_owned();
        handle_line(adapter, &line, &mut acc, tx).await?;
    }

    Ok(acc)
}

async fn handle_line<A: StreamAdapter>(
    adapter: &mut A,
    line: &str,
    acc: &mut StreamAccumulator,
    tx: &mpsc::Sender<UnifiedStreamEvent>,
) -> LlmResult<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let events = match adapter.adapt(line) {
        Ok(events) => events,
        Err(e) => {
            tracing::warn!(
                provider = adapter.provider_name(),
                error = %e,
                "skipping unparseable stream line"
            );
            return Ok(());
        }
    };

    for event in events {
        match &event {
            UnifiedStreamEvent::TextDelta { content } => {
                acc.content.push_str(content);
                let _ = tx.send(event).await;
            }
            UnifiedStreamEvent::Usage {
                input_tokens,
                output_tokens,
            } => {
                acc.usage.input_tokens = *input_tokens;
                acc.usage.output_tokens = *output_tokens;
            }
            UnifiedStreamEvent::Complete { stop_reason } => {
                acc.stop_reason = stop_reason.as_deref().map(StopReason::from);
            }
            UnifiedStreamEvent::Error { message, code } => {
                return Err(LlmError::ServerError {
                    message: match code {
                        Some(code) => format!("{} ({})", message, code),
                        None => message.clone(),
                    },
                    status: None,
                });
            }
        }
    }
    Ok(())
}

// ============================================================================
// Token budgeting
// ============================================================================

/// Context window size in tokens for a model name.
pub fn context_window(model: &str) -> u32 {
    let model = model.to_lowercase();
    if model.starts_with("gemini") {
        1_048_576
    } else if model.starts_with("gpt-4o") || model.starts_with("gpt-4-turbo") || model.starts_with("gpt-4.1") {
        128_000
    } else if model.starts_with("gpt-4") {
        8_192
    } else if model.starts_with("gpt-3.5") {
        16_385
    } else {
        128_000
    }
}

/// Output token cap for a prompt of `prompt_tokens`.
///
/// Leaves a 1000-token margin inside the context window and never goes
/// below 2000.
pub fn output_token_budget(model: &str, prompt_tokens: u32, configured_max: u32) -> u32 {
    let available = context_window(model).saturating_sub(prompt_tokens.saturating_add(1000));
    configured_max.min(available).max(2000)
}

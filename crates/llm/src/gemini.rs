//! Gemini Provider
//!
//! Implementation of the LlmProvider trait for Google's Generative Language
//! API. Strict mode sets `generationConfig.responseMimeType` to JSON.
//!
//! When the configured model is not found, the next candidate model is tried
//! (configured model first, then `fallback_models`, or the built-in list when
//! none are configured).

use async_trait::async_trait;
use tokio::sync::mpsc;
use url::Url;

use super::provider::{
    drain_sse, error_from_response, missing_api_key_error, output_token_budget, LlmProvider,
    StreamAccumulator,
};
use super::types::{
    CompletionOptions, LlmError, LlmResponse, LlmResult, ProviderConfig, ProviderType,
    StopReason, StructuredOutputMode,
};
use crate::http_client::build_http_client;
use crate::streaming_adapters::GeminiAdapter;
use market_lens_core::analysis::PromptBundle;
use market_lens_core::streaming::{StreamAdapter, UnifiedStreamEvent};

/// Default Gemini API endpoint
const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Models tried after the configured one when it is not found.
const DEFAULT_FALLBACK_MODELS: &[&str] = &["gemini-2.0-flash", "gemini-1.5-flash"];

/// Gemini provider
pub struct GeminiProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl GeminiProvider {
    /// Create a new Gemini provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client()?;
        Ok(Self { config, client })
    }

    fn base_url(&self) -> &str {
        self.config
            .base_url
            .as_deref()
            .unwrap_or(GEMINI_API_URL)
            .trim_end_matches('/')
    }

    /// Ordered, de-duplicated model candidates.
    pub fn model_candidates(&self) -> Vec<String> {
        let mut candidates = vec![self.config.model.clone()];
        let extra: Vec<String> = if self.config.fallback_models.is_empty() {
            DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect()
        } else {
            self.config.fallback_models.clone()
        };
        for model in extra {
            if !candidates.contains(&model) {
                candidates.push(model);
            }
        }
        candidates
    }

    fn endpoint(&self, model: &str, stream: bool) -> LlmResult<Url> {
        let method = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = Url::parse(&format!("{}/models/{}:{}", self.base_url(), model, method))
            .map_err(|e| LlmError::InvalidRequest {
                message: format!("invalid Gemini endpoint: {}", e),
            })?;
        if stream {
            url.query_pairs_mut().append_pair("alt", "sse");
        }
        Ok(url)
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        model: &str,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        json_mode: bool,
    ) -> serde_json::Value {
        let max_tokens = options.max_tokens_override.unwrap_or_else(|| {
            output_token_budget(model, prompt.estimated_tokens(), self.config.max_tokens)
        });

        let mut generation_config = serde_json::json!({
            "temperature": options.temperature_override.unwrap_or(self.config.temperature),
            "maxOutputTokens": max_tokens,
        });
        if json_mode {
            generation_config["responseMimeType"] = serde_json::json!("application/json");
        }

        serde_json::json!({
            "systemInstruction": { "parts": [{ "text": prompt.system_message }] },
            "contents": [{ "role": "user", "parts": [{ "text": prompt.user_prompt }] }],
            "generationConfig": generation_config,
        })
    }

    async fn complete_with_model(
        &self,
        model: &str,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        json_mode: bool,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("gemini"))?;

        let body = self.build_request_body(model, prompt, options, json_mode);

        let response = self
            .client
            .post(self.endpoint(model, options.stream)?)
            .header("x-goog-api-key", api_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(match error_from_response(response, "gemini").await {
                LlmError::ModelNotFound { .. } => LlmError::ModelNotFound {
                    model: model.to_string(),
                },
                other => other,
            });
        }

        let mut adapter = GeminiAdapter::new(model);
        if options.stream {
            let acc = drain_sse(response, &mut adapter, tx).await?;
            return Ok(acc.into_response(model));
        }

        let text = response.text().await?;
        let mut acc = StreamAccumulator::default();
        let events = adapter
            .adapt(&text)
            .map_err(|e| LlmError::ParseError {
                message: e.to_string(),
            })?;
        for event in events {
            match event {
                UnifiedStreamEvent::TextDelta { content } => {
                    acc.content.push_str(&content);
                    let _ = tx.send(UnifiedStreamEvent::TextDelta { content }).await;
                }
                UnifiedStreamEvent::Usage {
                    input_tokens,
                    output_tokens,
                } => {
                    acc.usage.input_tokens = input_tokens;
                    acc.usage.output_tokens = output_tokens;
                }
                UnifiedStreamEvent::Complete { stop_reason } => {
                    acc.stop_reason = stop_reason.as_deref().map(StopReason::from);
                }
                UnifiedStreamEvent::Error { message, .. } => {
                    return Err(LlmError::ServerError {
                        message,
                        status: None,
                    });
                }
            }
        }
        Ok(acc.into_response(model))
    }

    /// One model, with the strict-then-relaxed JSON negotiation.
    async fn complete_negotiated(
        &self,
        model: &str,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        if options.structured_output == StructuredOutputMode::Strict {
            match self
                .complete_with_model(model, prompt, options, true, tx)
                .await
            {
                Err(LlmError::StructuredOutputRejected { message }) => {
                    tracing::warn!(
                        provider = "gemini",
                        model = %model,
                        reason = %message,
                        "json mode rejected, retrying in relaxed mode"
                    );
                }
                other => return other,
            }
        }
        self.complete_with_model(model, prompt, options, false, tx)
            .await
    }
}

#[async_trait]
impl LlmProvider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Gemini
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let mut last_err = None;
        for model in self.model_candidates() {
            match self.complete_negotiated(&model, prompt, options, &tx).await {
                Err(LlmError::ModelNotFound { model: missing }) => {
                    tracing::warn!(
                        provider = "gemini",
                        model = %missing,
                        "model not found, trying next candidate"
                    );
                    last_err = Some(LlmError::ModelNotFound { model: missing });
                }
                other => return other,
            }
        }
        Err(last_err.unwrap_or_else(|| LlmError::ModelNotFound {
            model: self.config.model.clone(),
        }))
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

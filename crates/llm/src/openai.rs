//! OpenAI Provider
//!
//! Implementation of the LlmProvider trait for OpenAI's chat completions API.
//! Strict mode requests `response_format: json_object`; a refusal is retried
//! once without it inside the same attempt.

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;

use super::provider::{
    drain_sse, error_from_response, missing_api_key_error, output_token_budget, LlmProvider,
};
use super::types::{
    CompletionOptions, LlmError, LlmResponse, LlmResult, ProviderConfig, ProviderType,
    StopReason, StructuredOutputMode, UsageStats,
};
use crate::http_client::build_http_client;
use crate::streaming_adapters::OpenAIAdapter;
use market_lens_core::analysis::PromptBundle;
use market_lens_core::streaming::UnifiedStreamEvent;

/// Default OpenAI API endpoint
const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// OpenAI provider
pub struct OpenAIProvider {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with the given configuration
    pub fn new(config: ProviderConfig) -> LlmResult<Self> {
        let client = build_http_client()?;
        Ok(Self { config, client })
    }

    /// Get the API base URL
    fn base_url(&self) -> &str {
        self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL)
    }

    /// Build the request body for the API
    fn build_request_body(
        &self,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        stream: bool,
        json_mode: bool,
    ) -> serde_json::Value {
        let max_tokens = options.max_tokens_override.unwrap_or_else(|| {
            output_token_budget(
                &self.config.model,
                prompt.estimated_tokens(),
                self.config.max_tokens,
            )
        });

        let mut body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "temperature": options.temperature_override.unwrap_or(self.config.temperature),
            "stream": stream,
            "messages": [
                { "role": "system", "content": prompt.system_message },
                { "role": "user", "content": prompt.user_prompt },
            ],
        });

        if stream {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        if json_mode {
            body["response_format"] = serde_json::json!({ "type": "json_object" });
        }
        body
    }

    async fn complete_once(
        &self,
        prompt: &PromptBundle,
        options: &CompletionOptions,
        json_mode: bool,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or_else(|| missing_api_key_error("openai"))?;

        let body = self.build_request_body(prompt, options, options.stream, json_mode);

        let response = self
            .client
            .post(self.base_url())
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(error_from_response(response, "openai").await);
        }

        if options.stream {
            let mut adapter = OpenAIAdapter::new(&self.config.model);
            let acc = drain_sse(response, &mut adapter, tx).await?;
            return Ok(acc.into_response(&self.config.model));
        }

        let parsed: OpenAIResponse = response.json().await?;
        parsed.into_llm_response(&self.config.model, tx).await
    }
}

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    #[serde(default)]
    choices: Vec<OpenAIChoice>,
    #[serde(default)]
    usage: Option<OpenAIUsage>,
    #[serde(default)]
    model: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

impl OpenAIResponse {
    async fn into_llm_response(
        self,
        model: &str,
        tx: &mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        let choice = self
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::ParseError {
                message: "response contained no choices".to_string(),
            })?;

        if let Some(content) = choice.message.content.as_ref() {
            let _ = tx
                .send(UnifiedStreamEvent::TextDelta {
                    content: content.clone(),
                })
                .await;
        }

        Ok(LlmResponse {
            content: choice.message.content,
            structured: None,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .map(StopReason::from)
                .unwrap_or(StopReason::EndTurn),
            usage: self
                .usage
                .map(|u| UsageStats {
                    input_tokens: u.prompt_tokens,
                    output_tokens: u.completion_tokens,
                })
                .unwrap_or_default(),
            model: self.model.unwrap_or_else(|| model.to_string()),
        })
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
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
        if options.structured_output == StructuredOutputMode::Strict {
            match self.complete_once(prompt, options, true, &tx).await {
                Err(LlmError::StructuredOutputRejected { message }) => {
                    tracing::warn!(
                        provider = "openai",
                        model = %self.config.model,
                        reason = %message,
                        "json mode rejected, retrying in relaxed mode"
                    );
                }
                other => return other,
            }
        }
        self.complete_once(prompt, options, false, &tx).await
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

//! LLM Types
//!
//! Core types for LLM provider interactions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Supported LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    /// Google Gemini (primary)
    Gemini,
    /// OpenAI chat completions (secondary)
    OpenAI,
    /// Deterministic local fallback, no network
    Offline,
}

impl ProviderType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "gemini",
            ProviderType::OpenAI => "openai",
            ProviderType::Offline => "offline",
        }
    }

    /// Default model when none is configured.
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::Gemini => "gemini-2.5-flash",
            ProviderType::OpenAI => "gpt-4o-mini",
            ProviderType::Offline => "offline-template",
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" | "google" => Ok(ProviderType::Gemini),
            "openai" | "gpt" => Ok(ProviderType::OpenAI),
            "offline" | "fallback" => Ok(ProviderType::Offline),
            other => Err(format!("unknown provider '{}'", other)),
        }
    }
}

/// How the provider should be asked for JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredOutputMode {
    /// Ask for native JSON mode; fall back to relaxed once if rejected.
    #[default]
    Strict,
    /// Rely on prompt instructions only.
    Relaxed,
}

/// Per-request options for provider behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Use the streaming endpoint and forward deltas.
    #[serde(default = "default_true")]
    pub stream: bool,
    /// JSON output negotiation.
    #[serde(default)]
    pub structured_output: StructuredOutputMode,
    /// Optional temperature override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature_override: Option<f32>,
    /// Optional output token cap override.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens_override: Option<u32>,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            stream: true,
            structured_output: StructuredOutputMode::Strict,
            temperature_override: None,
            max_tokens_override: None,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Configuration for an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// The provider type
    pub provider: ProviderType,
    /// API key (not needed for the offline provider)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Base URL override (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Model name to use
    pub model: String,
    /// Additional models to try when the configured one is not found
    #[serde(default)]
    pub fallback_models: Vec<String>,
    /// Maximum tokens to generate
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Temperature for sampling
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Additional provider-specific options
    #[serde(default)]
    pub options: HashMap<String, serde_json::Value>,
}

fn default_max_tokens() -> u32 {
    8000
}

fn default_temperature() -> f32 {
    0.7
}

impl ProviderConfig {
    /// Config for a provider with its default model.
    pub fn new(provider: ProviderType) -> Self {
        Self {
            provider,
            api_key: None,
            base_url: None,
            model: provider.default_model().to_string(),
            fallback_models: Vec::new(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            options: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(ProviderType::Gemini)
    }
}

/// Token usage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    /// Number of input/prompt tokens
    pub input_tokens: u32,
    /// Number of output/completion tokens
    pub output_tokens: u32,
}

impl UsageStats {
    /// Total tokens used
    pub fn total_tokens(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }
}

/// Stop reason for the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Natural end of response
    EndTurn,
    /// Hit max tokens limit
    MaxTokens,
    /// Blocked by provider safety filters
    ContentFilter,
    /// Other/unknown reason
    Other(String),
}

impl From<&str> for StopReason {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "end_turn" | "stop" => StopReason::EndTurn,
            "max_tokens" | "length" => StopReason::MaxTokens,
            "content_filter" | "safety" | "recitation" => StopReason::ContentFilter,
            other => StopReason::Other(other.to_string()),
        }
    }
}

/// Response from an LLM provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    /// Text content of the response
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Already-structured payload (local providers skip text extraction)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured: Option<serde_json::Value>,
    /// Why the response ended
    pub stop_reason: StopReason,
    /// Token usage statistics
    pub usage: UsageStats,
    /// The model that generated the response
    pub model: String,
}

impl LlmResponse {
    /// Whether the response carries neither text nor a structured payload.
    pub fn is_empty(&self) -> bool {
        self.structured.is_none()
            && self
                .content
                .as_deref()
                .map(|c| c.trim().is_empty())
                .unwrap_or(true)
    }
}

/// Error types for LLM operations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmError {
    /// Authentication failed (invalid API key)
    AuthenticationFailed { message: String },
    /// Rate limit exceeded
    RateLimited {
        message: String,
        retry_after: Option<u32>,
    },
    /// Model not found or not available
    ModelNotFound { model: String },
    /// Invalid request (bad parameters)
    InvalidRequest { message: String },
    /// Native JSON mode was refused by the provider
    StructuredOutputRejected { message: String },
    /// Server error from the provider
    ServerError {
        message: String,
        status: Option<u16>,
    },
    /// Network/connection error
    NetworkError { message: String },
    /// Attempt exceeded its time budget
    Timeout { message: String },
    /// Response parsing error
    ParseError { message: String },
    /// Provider not available
    ProviderUnavailable { message: String },
    /// Attempt aborted by the caller
    Cancelled,
    /// Other error
    Other { message: String },
}

impl LlmError {
    /// Whether the same provider may be retried after this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LlmError::RateLimited { .. }
                | LlmError::StructuredOutputRejected { .. }
                | LlmError::ServerError { .. }
                | LlmError::NetworkError { .. }
                | LlmError::Timeout { .. }
                | LlmError::ProviderUnavailable { .. }
        )
    }

    /// Provider-suggested wait before retrying, in seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            LlmError::RateLimited {
                retry_after: Some(secs),
                ..
            } => Some(*secs as u64),
            _ => None,
        }
    }

    /// Stable snake_case label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            LlmError::AuthenticationFailed { .. } => "authentication_failed",
            LlmError::RateLimited { .. } => "rate_limited",
            LlmError::ModelNotFound { .. } => "model_not_found",
            LlmError::InvalidRequest { .. } => "invalid_request",
            LlmError::StructuredOutputRejected { .. } => "structured_output_rejected",
            LlmError::ServerError { .. } => "server_error",
            LlmError::NetworkError { .. } => "network_error",
            LlmError::Timeout { .. } => "timeout",
            LlmError::ParseError { .. } => "parse_error",
            LlmError::ProviderUnavailable { .. } => "provider_unavailable",
            LlmError::Cancelled => "cancelled",
            LlmError::Other { .. } => "other",
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            LlmError::Timeout {
                message: err.to_string(),
            }
        } else if err.is_decode() {
            LlmError::ParseError {
                message: err.to_string(),
            }
        } else {
            LlmError::NetworkError {
                message: err.to_string(),
            }
        }
    }
}

impl std::fmt::Display for LlmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LlmError::AuthenticationFailed { message } => {
                write!(f, "Authentication failed: {}", message)
            }
            LlmError::RateLimited { message, .. } => {
                write!(f, "Rate limited: {}", message)
            }
            LlmError::ModelNotFound { model } => {
                write!(f, "Model not found: {}", model)
            }
            LlmError::InvalidRequest { message } => {
                write!(f, "Invalid request: {}", message)
            }
            LlmError::StructuredOutputRejected { message } => {
                write!(f, "Structured output rejected: {}", message)
            }
            LlmError::ServerError { message, status } => {
                if let Some(s) = status {
                    write!(f, "Server error ({}): {}", s, message)
                } else {
                    write!(f, "Server error: {}", message)
                }
            }
            LlmError::NetworkError { message } => {
                write!(f, "Network error: {}", message)
            }
            LlmError::Timeout { message } => {
                write!(f, "Timeout: {}", message)
            }
            LlmError::ParseError { message } => {
                write!(f, "Parse error: {}", message)
            }
            LlmError::ProviderUnavailable { message } => {
                write!(f, "Provider unavailable: {}", message)
            }
            LlmError::Cancelled => write!(f, "Cancelled"),
            LlmError::Other { message } => {
                write!(f, "Error: {}", message)
            }
        }
    }
}

impl std::error::Error for LlmError {}

/// Result type for LLM operations
pub type LlmResult<T> = Result<T, LlmError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_config_default() {
        let config = ProviderConfig::new(ProviderType::OpenAI);
        assert_eq!(config.model, "gpt-4o-mini");
        assert_eq!(config.max_tokens, 8000);
        assert!((config.temperature - 0.7).abs() < f32::EPSILON);
    }

    #[test]
    fn test_provider_config_serialization() {
        let config = ProviderConfig::new(ProviderType::Gemini)
            .with_api_key("AIza-test-key-000000000000")
            .with_model("gemini-2.0-flash");

        let json = serde_json::to_string(&config).unwrap();
        let parsed: ProviderConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.model, "gemini-2.0-flash");
        assert_eq!(parsed.provider, ProviderType::Gemini);
    }

    #[test]
    fn test_provider_type_from_str() {
        assert_eq!("Gemini".parse::<ProviderType>(), Ok(ProviderType::Gemini));
        assert_eq!("openai".parse::<ProviderType>(), Ok(ProviderType::OpenAI));
        assert!("claude".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_stop_reason_from_str() {
        assert_eq!(StopReason::from("STOP"), StopReason::EndTurn);
        assert_eq!(StopReason::from("length"), StopReason::MaxTokens);
        assert_eq!(StopReason::from("MAX_TOKENS"), StopReason::MaxTokens);
        assert_eq!(StopReason::from("SAFETY"), StopReason::ContentFilter);
        assert_eq!(
            StopReason::from("unknown_reason"),
            StopReason::Other("unknown_reason".to_string())
        );
    }

    #[test]
    fn test_error_retry_classification() {
        assert!(LlmError::Timeout {
            message: "slow".into()
        }
        .is_retryable());
        assert!(LlmError::StructuredOutputRejected {
            message: "no json mode".into()
        }
        .is_retryable());
        assert!(!LlmError::AuthenticationFailed {
            message: "bad key".into()
        }
        .is_retryable());
        assert!(!LlmError::InvalidRequest {
            message: "bad".into()
        }
        .is_retryable());

        let err = LlmError::RateLimited {
            message: "slow down".into(),
            retry_after: Some(5),
        };
        assert_eq!(err.retry_after_secs(), Some(5));
        assert_eq!(err.kind(), "rate_limited");
    }

    #[test]
    fn test_error_serialization() {
        let err = LlmError::ServerError {
            message: "overloaded".into(),
            status: Some(503),
        };
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("\"type\":\"server_error\""));
        assert_eq!(err.to_string(), "Server error (503): overloaded");
    }

    #[test]
    fn test_response_is_empty() {
        let resp = LlmResponse {
            content: Some("   ".into()),
            structured: None,
            stop_reason: StopReason::EndTurn,
            usage: UsageStats::default(),
            model: "m".into(),
        };
        assert!(resp.is_empty());
    }
}

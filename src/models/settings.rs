//! Settings Models
//!
//! Application configuration and settings data structures. Every section has
//! defaults so a partial (or absent) `market-lens.toml` is valid.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use market_lens_core::AnalysisType;
use market_lens_llm::{ProviderConfig, ProviderType};

/// Application configuration stored in market-lens.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerSettings,
    pub providers: ProviderSettings,
    pub retry: RetrySettings,
    pub timeouts: TimeoutSettings,
    pub cache: CacheSettings,
    pub prompt: PromptSettings,
    /// Default tracing filter when RUST_LOG is unset
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            providers: ProviderSettings::default(),
            retry: RetrySettings::default(),
            timeouts: TimeoutSettings::default(),
            cache: CacheSettings::default(),
            prompt: PromptSettings::default(),
            log_level: "info".to_string(),
        }
    }
}

/// HTTP listener settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
        }
    }
}

/// Provider priority and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Network providers in the order they are tried
    pub priority: Vec<ProviderType>,
    pub gemini: ProviderEntry,
    pub openai: ProviderEntry,
    /// Append the deterministic offline provider as the last resort
    pub offline_fallback: bool,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            priority: vec![ProviderType::Gemini, ProviderType::OpenAI],
            gemini: ProviderEntry::default(),
            openai: ProviderEntry::default(),
            offline_fallback: true,
        }
    }
}

/// One network provider's settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderEntry {
    pub enabled: bool,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub fallback_models: Vec<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderEntry {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            model: None,
            base_url: None,
            fallback_models: Vec::new(),
            max_tokens: 8000,
            temperature: 0.7,
        }
    }
}

/// Retry policy for transient provider failures
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt, per network provider
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 500,
            max_delay_ms: 4_000,
        }
    }
}

/// Attempt and request time budgets
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSettings {
    pub attempt_secs: u64,
    pub request_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            attempt_secs: 60,
            request_secs: 180,
        }
    }
}

impl TimeoutSettings {
    pub fn attempt(&self) -> Duration {
        Duration::from_secs(self.attempt_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Response cache settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: u64,
    pub keyword_ttl_secs: u64,
    pub audience_ttl_secs: u64,
    pub comprehensive_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 500,
            keyword_ttl_secs: 1_800,
            audience_ttl_secs: 7_200,
            comprehensive_ttl_secs: 3_600,
        }
    }
}

impl CacheSettings {
    /// TTL for results of the given analysis type.
    pub fn ttl_for(&self, analysis_type: AnalysisType) -> Duration {
        let secs = match analysis_type {
            AnalysisType::Keyword => self.keyword_ttl_secs,
            AnalysisType::Audience => self.audience_ttl_secs,
            AnalysisType::Comprehensive => self.comprehensive_ttl_secs,
        };
        Duration::from_secs(secs)
    }
}

/// Prompt size budget
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptSettings {
    /// Hard cap on the user prompt, in characters
    pub max_prompt_chars: usize,
    /// Cap on the additional-context block before prompt-level trimming
    pub max_context_chars: usize,
}

impl Default for PromptSettings {
    fn default() -> Self {
        Self {
            max_prompt_chars: 6_000,
            max_context_chars: 2_000,
        }
    }
}

/// Check an API key's format for a provider.
///
/// OpenAI keys start with `sk-`; both providers require at least 20 characters.
pub fn is_valid_api_key(provider: ProviderType, key: &str) -> bool {
    let key = key.trim();
    match provider {
        ProviderType::OpenAI => key.starts_with("sk-") && key.len() >= 20,
        ProviderType::Gemini => key.len() >= 20,
        ProviderType::Offline => true,
    }
}

impl AppConfig {
    fn entry(&self, provider: ProviderType) -> Option<&ProviderEntry> {
        match provider {
            ProviderType::Gemini => Some(&self.providers.gemini),
            ProviderType::OpenAI => Some(&self.providers.openai),
            ProviderType::Offline => None,
        }
    }

    /// Whether a network provider is enabled and has a well-formed key.
    pub fn is_provider_available(&self, provider: ProviderType) -> bool {
        match provider {
            ProviderType::Offline => self.providers.offline_fallback,
            _ => self
                .entry(provider)
                .filter(|e| e.enabled)
                .and_then(|e| e.api_key.as_deref())
                .map(|key| is_valid_api_key(provider, key))
                .unwrap_or(false),
        }
    }

    /// Network providers in priority order, minus those without credentials.
    pub fn available_providers(&self) -> Vec<ProviderType> {
        let mut out = Vec::new();
        for provider in &self.providers.priority {
            if *provider != ProviderType::Offline
                && !out.contains(provider)
                && self.is_provider_available(*provider)
            {
                out.push(*provider);
            }
        }
        out
    }

    /// Build the LLM crate config for a network provider.
    pub fn provider_config(&self, provider: ProviderType) -> ProviderConfig {
        let mut config = ProviderConfig::new(provider);
        if let Some(entry) = self.entry(provider) {
            config.api_key = entry.api_key.as_ref().map(|k| k.trim().to_string());
            if let Some(model) = entry.model.as_ref().filter(|m| !m.trim().is_empty()) {
                config.model = model.clone();
            }
            config.base_url = entry.base_url.clone();
            config.fallback_models = entry.fallback_models.clone();
            config.max_tokens = entry.max_tokens;
            config.temperature = entry.temperature;
        }
        config
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.timeouts.attempt_secs == 0 {
            return Err("timeouts.attempt_secs must be greater than 0".to_string());
        }
        if self.timeouts.attempt_secs >= self.timeouts.request_secs {
            return Err(format!(
                "timeouts.attempt_secs ({}) must be shorter than timeouts.request_secs ({})",
                self.timeouts.attempt_secs, self.timeouts.request_secs
            ));
        }
        if self.retry.max_retries > 10 {
            return Err("retry.max_retries cannot exceed 10".to_string());
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err("retry.base_delay_ms cannot exceed retry.max_delay_ms".to_string());
        }
        if self.cache.enabled {
            if self.cache.max_entries == 0 {
                return Err("cache.max_entries must be greater than 0".to_string());
            }
            for t in AnalysisType::ALL {
                if self.cache.ttl_for(t).is_zero() {
                    return Err(format!("cache TTL for {} must be greater than 0", t));
                }
            }
        }
        if self.prompt.max_prompt_chars < 1_000 {
            return Err("prompt.max_prompt_chars must be at least 1000".to_string());
        }
        for entry in [&self.providers.gemini, &self.providers.openai] {
            if !(0.0..=2.0).contains(&entry.temperature) {
                return Err(format!(
                    "provider temperature {} is outside 0.0..=2.0",
                    entry.temperature
                ));
            }
        }
        Ok(())
    }
}

//! Provider Registry
//!
//! Turns configuration into the ordered provider chain. Network providers
//! appear in configured priority order when enabled and holding a
//! well-formed key; the offline template provider is appended last when the
//! fallback is enabled.

use std::sync::Arc;

use market_lens_llm::{GeminiProvider, LlmProvider, OfflineProvider, OpenAIProvider, ProviderType};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};

/// Build the provider chain for a configuration.
pub fn build_provider_chain(config: &AppConfig) -> AppResult<Vec<Arc<dyn LlmProvider>>> {
    let mut chain: Vec<Arc<dyn LlmProvider>> = Vec::new();

    for provider in config.available_providers() {
        let provider_config = config.provider_config(provider);
        let built: Arc<dyn LlmProvider> = match provider {
            ProviderType::Gemini => Arc::new(GeminiProvider::new(provider_config)?),
            ProviderType::OpenAI => Arc::new(OpenAIProvider::new(provider_config)?),
            ProviderType::Offline => continue,
        };
        tracing::info!(provider = built.name(), model = built.model(), "provider registered");
        chain.push(built);
    }

    if config.providers.offline_fallback {
        chain.push(Arc::new(OfflineProvider::new()));
    }

    if chain.is_empty() {
        return Err(AppError::config(
            "no analysis provider available: set GEMINI_API_KEY or OPENAI_API_KEY, or enable providers.offline_fallback",
        ));
    }
    Ok(chain)
}

//! Application State
//!
//! Shared state handed to every HTTP handler.

use std::sync::Arc;

use crate::models::response::ProviderStatus;
use crate::models::settings::AppConfig;
use crate::services::analysis::{AnalysisOrchestrator, CacheStats, MemoryResponseCache, ResponseCache};
use crate::utils::error::AppResult;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    orchestrator: Arc<AnalysisOrchestrator>,
    /// Kept separately from the orchestrator's trait object for stats
    cache: Option<Arc<MemoryResponseCache>>,
}

impl AppState {
    /// Build the provider chain and cache from configuration
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let cache = config
            .cache
            .enabled
            .then(|| Arc::new(MemoryResponseCache::from_settings(&config.cache)));
        let shared: Option<Arc<dyn ResponseCache>> =
            cache.clone().map(|c| c as Arc<dyn ResponseCache>);
        let orchestrator = AnalysisOrchestrator::from_config(&config, shared)?;

        Ok(Self {
            config: Arc::new(config),
            orchestrator: Arc::new(orchestrator),
            cache,
        })
    }

    /// Assemble state from prebuilt parts
    pub fn from_parts(
        config: AppConfig,
        orchestrator: Arc<AnalysisOrchestrator>,
        cache: Option<Arc<MemoryResponseCache>>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            orchestrator,
            cache,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn orchestrator(&self) -> &Arc<AnalysisOrchestrator> {
        &self.orchestrator
    }

    /// Cache counters, or `None` when caching is disabled
    pub fn cache_stats(&self) -> Option<CacheStats> {
        self.cache.as_ref().map(|c| c.stats())
    }

    /// Drop every cached result. Returns the number of entries removed, or
    /// `None` when caching is disabled.
    pub fn clear_cache(&self) -> Option<u64> {
        self.cache.as_ref().map(|cache| {
            let removed = cache.entry_count();
            cache.clear();
            tracing::info!(removed, "response cache cleared");
            removed
        })
    }

    /// Providers in chain order, without credentials
    pub fn provider_statuses(&self) -> Vec<ProviderStatus> {
        self.orchestrator
            .providers()
            .iter()
            .map(|p| ProviderStatus {
                name: p.name().to_string(),
                model: p.model().to_string(),
                available: true,
            })
            .collect()
    }
}

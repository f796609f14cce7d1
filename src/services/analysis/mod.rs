//! Analysis Pipeline
//!
//! Prompt construction, provider fallback, streaming sentence extraction,
//! JSON repair, normalization, result caching, progress polling and run
//! metrics for market analyses.

pub mod cache;
pub mod fallback;
pub mod json_extractor;
pub mod metrics;
pub mod normalizer;
pub mod orchestrator;
pub mod progress;
pub mod prompt_builder;
pub mod registry;
pub mod sentences;

pub use cache::{CacheKey, CacheStats, MemoryResponseCache, ResponseCache};
pub use fallback::{
    run_chain, AttemptRunner, AttemptStatus, ChainError, ChainSuccess, ClassifiedError,
    FailureKind, ProviderAttempt, RetryPolicy,
};
pub use json_extractor::{extract, Extraction, ExtractionError, RepairRung};
pub use metrics::{MetricsSummary, PipelineMetrics, ProviderMetrics, RecordedError, RunOutcome};
pub use normalizer::normalize;
pub use orchestrator::{collect_terminal, AnalysisOrchestrator, AnalysisStream, RunOptions};
pub use progress::{
    ProgressRegistry, ProgressSnapshot, ProgressStatus, ProgressStep, ProgressTracker,
};
pub use prompt_builder::PromptBuilder;
pub use registry::build_provider_chain;
pub use sentences::{Sentence, SentenceSplitter};

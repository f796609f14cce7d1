//! Analysis Pipeline Integration Tests
//!
//! Drives the orchestrator end to end with scripted providers:
//! - Fenced and malformed model output repaired into normalized results
//! - Retries, fallback order and fatal errors
//! - Progress ordering and terminal events
//! - Response cache hits, bypass and expiry
//! - Cancellation mid-stream
//!
//! No network calls are made.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use market_lens::models::analysis_result::NormalizedResult;
use market_lens::models::settings::CacheSettings;
use market_lens::services::analysis::{
    extract, MemoryResponseCache, PromptBuilder, RepairRung, ResponseCache, RetryPolicy,
};
use market_lens::{AnalysisOrchestrator, AnalysisRequest, AppError, ErrorKind, RunOptions, StreamEvent};
use market_lens_core::{AnalysisType, PromptBundle, UnifiedStreamEvent};
use market_lens_llm::{
    CompletionOptions, LlmError, LlmProvider, LlmResponse, LlmResult, OfflineProvider,
    ProviderConfig, ProviderType, StopReason, UsageStats,
};

// ============================================================================
// Helpers
// ============================================================================

enum Step {
    Reply(&'static str),
    Fail(LlmError),
    Hang,
}

/// Plays back one step per call; the last step repeats.
struct ScriptedProvider {
    provider: ProviderType,
    config: ProviderConfig,
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(provider: ProviderType, steps: Vec<Step>) -> Arc<Self> {
        Arc::new(Self {
            provider,
            config: ProviderConfig::new(provider),
            steps: Mutex::new(steps.into()),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        let mut steps = self.steps.lock().unwrap();
        if steps.len() > 1 {
            return steps.pop_front().unwrap();
        }
        match steps.front() {
            Some(Step::Reply(text)) => Step::Reply(text),
            Some(Step::Fail(err)) => Step::Fail(err.clone()),
            Some(Step::Hang) | None => Step::Hang,
        }
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        self.provider.as_str()
    }

    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        _prompt: &PromptBundle,
        _options: &CompletionOptions,
        tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.next_step() {
            Step::Reply(text) => {
                for chunk in text.as_bytes().chunks(24) {
                    let content = String::from_utf8_lossy(chunk).into_owned();
                    let _ = tx.send(UnifiedStreamEvent::TextDelta { content }).await;
                }
                Ok(LlmResponse {
                    content: Some(text.to_string()),
                    structured: None,
                    stop_reason: StopReason::EndTurn,
                    usage: UsageStats::default(),
                    model: self.config.model.clone(),
                })
            }
            Step::Fail(err) => Err(err),
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(LlmError::Timeout {
                    message: "hung".to_string(),
                })
            }
        }
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        max_retries: 1,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        attempt_timeout: Duration::from_secs(2),
        request_timeout: Duration::from_secs(5),
    }
}

fn orchestrator(providers: Vec<Arc<dyn LlmProvider>>) -> AnalysisOrchestrator {
    AnalysisOrchestrator::new(providers, PromptBuilder::default(), fast_policy())
}

fn keyword(subject: &str) -> AnalysisRequest {
    AnalysisRequest::new(subject, AnalysisType::Keyword).unwrap()
}

fn timeout_error() -> LlmError {
    LlmError::Timeout {
        message: "attempt timed out".to_string(),
    }
}

async fn run_events(orch: &Arc<AnalysisOrchestrator>, request: AnalysisRequest) -> Vec<StreamEvent> {
    orch.stream(request, RunOptions::default()).collect().await
}

fn progress_values(events: &[StreamEvent]) -> Vec<u8> {
    events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Progress { progress, .. } => Some(*progress),
            _ => None,
        })
        .collect()
}

const FENCED_KEYWORD: &str = "Here is the analysis:\n```json\n{\n  \"executive_summary\": \"Cold brew demand keeps rising in urban markets. Younger buyers drive the growth.\",\n  \"detailed_analysis\": {\n    \"trend_analysis\": {\"direction\": \"up\"},\n    \"sentiment_analysis\": {\"positive\": 0.7}\n  }\n}\n```\nLet me know if you need more.";

const TRAILING_COMMA_KEYWORD: &str = "{\"executive_summary\": \"Oat milk sales are flattening.\", \"key_findings\": [\"Price sensitivity is rising.\",],}";

// ============================================================================
// Repair and normalization
// ============================================================================

#[tokio::test]
async fn test_fenced_output_normalizes_with_missing_section() {
    let gemini = ScriptedProvider::new(ProviderType::Gemini, vec![Step::Reply(FENCED_KEYWORD)]);
    let orch = Arc::new(orchestrator(vec![gemini.clone()]));

    let events = run_events(&orch, keyword("cold brew")).await;
    let result = match events.last().unwrap() {
        StreamEvent::Complete { data } => (**data).clone(),
        other => panic!("expected complete, got {:?}", other),
    };

    match result {
        NormalizedResult::Keyword(analysis) => {
            assert_eq!(analysis.target_keyword, "cold brew");
            assert!(analysis.executive_summary.starts_with("Cold brew demand"));
            assert!(analysis.detailed_analysis.competition_analysis.is_empty());
            assert!(analysis.metadata.has_trend_data);
            assert!(analysis.metadata.has_sentiment_data);
            assert!(!analysis.metadata.has_competition_data);
        }
        other => panic!("expected keyword result, got {:?}", other),
    }

    let sentences: Vec<(&str, &str)> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::Sentence { content, section } => Some((content.as_str(), section.as_str())),
            _ => None,
        })
        .collect();
    assert_eq!(
        sentences,
        vec![
            ("Cold brew demand keeps rising in urban markets.", "executive_summary"),
            ("Younger buyers drive the growth.", "executive_summary"),
        ]
    );
    assert_eq!(gemini.calls(), 1);
}

#[tokio::test]
async fn test_timeouts_fall_through_to_secondary_with_repair() {
    let gemini = ScriptedProvider::new(ProviderType::Gemini, vec![Step::Fail(timeout_error())]);
    let openai = ScriptedProvider::new(
        ProviderType::OpenAI,
        vec![Step::Reply(TRAILING_COMMA_KEYWORD)],
    );
    let offline = Arc::new(OfflineProvider::new());
    let orch = Arc::new(orchestrator(vec![gemini.clone(), openai.clone(), offline]));

    let result = orch.analyze(keyword("oat milk"), RunOptions::default()).await.unwrap();

    assert_eq!(gemini.calls(), 2);
    assert_eq!(openai.calls(), 1);
    assert_eq!(result.executive_summary(), "Oat milk sales are flattening.");
    match result {
        NormalizedResult::Keyword(analysis) => {
            assert_eq!(analysis.key_findings.findings.len(), 1);
        }
        other => panic!("expected keyword result, got {:?}", other),
    }

    let extraction = extract(TRAILING_COMMA_KEYWORD).unwrap();
    assert_eq!(extraction.rung, RepairRung::TrailingComma);
}

// ============================================================================
// Fallback chain
// ============================================================================

#[tokio::test]
async fn test_offline_fallback_terminates_chain() {
    let gemini = ScriptedProvider::new(
        ProviderType::Gemini,
        vec![Step::Fail(LlmError::ServerError {
            message: "overloaded".to_string(),
            status: Some(503),
        })],
    );
    let orch = Arc::new(orchestrator(vec![gemini.clone(), Arc::new(OfflineProvider::new())]));

    let events = run_events(&orch, AnalysisRequest::new("smart rings", AnalysisType::Audience).unwrap()).await;

    assert_eq!(gemini.calls(), 2);
    match events.last().unwrap() {
        StreamEvent::Complete { data } => {
            assert_eq!(data.analysis_type(), AnalysisType::Audience);
            assert_eq!(data.target_keyword(), "smart rings");
            assert!(!data.executive_summary().is_empty());
        }
        other => panic!("expected complete, got {:?}", other),
    }
}

#[tokio::test]
async fn test_auth_failure_is_not_retried() {
    let gemini = ScriptedProvider::new(
        ProviderType::Gemini,
        vec![Step::Fail(LlmError::AuthenticationFailed {
            message: "gemini: Invalid API key".to_string(),
        })],
    );
    let openai = ScriptedProvider::new(
        ProviderType::OpenAI,
        vec![Step::Reply("{\"executive_summary\": \"Recovered on the secondary.\"}")],
    );
    let orch = Arc::new(orchestrator(vec![gemini.clone(), openai.clone()]));

    let result = orch.analyze(keyword("kombucha"), RunOptions::default()).await.unwrap();

    assert_eq!(gemini.calls(), 1);
    assert_eq!(openai.calls(), 1);
    assert_eq!(result.executive_summary(), "Recovered on the secondary.");
}

#[tokio::test]
async fn test_exhaustion_without_offline_fallback() {
    let gemini = ScriptedProvider::new(
        ProviderType::Gemini,
        vec![Step::Fail(LlmError::NetworkError {
            message: "connection reset".to_string(),
        })],
    );
    let openai = ScriptedProvider::new(ProviderType::OpenAI, vec![Step::Reply("no json here at all")]);
    let orch = Arc::new(orchestrator(vec![gemini.clone(), openai.clone()]));

    let events = run_events(&orch, keyword("vinyl records")).await;

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    match events.last().unwrap() {
        StreamEvent::Error { kind, message } => {
            assert_eq!(*kind, ErrorKind::ProviderExhausted);
            assert!(message.contains("gemini#1"));
            assert!(message.contains("openai#1"));
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(gemini.calls(), 2);
    assert_eq!(openai.calls(), 1);

    let err = orch.analyze(keyword("vinyl records"), RunOptions::default()).await.unwrap_err();
    assert!(matches!(
        err,
        AppError::Analysis {
            kind: ErrorKind::ProviderExhausted,
            ..
        }
    ));
}

#[tokio::test]
async fn test_preference_moves_provider_first() {
    let gemini = ScriptedProvider::new(
        ProviderType::Gemini,
        vec![Step::Reply("{\"executive_summary\": \"From gemini.\"}")],
    );
    let openai = ScriptedProvider::new(
        ProviderType::OpenAI,
        vec![Step::Reply("{\"executive_summary\": \"From openai.\"}")],
    );
    let orch = Arc::new(orchestrator(vec![gemini.clone(), openai.clone()]));

    let request = keyword("matcha").with_provider_preference(ProviderType::OpenAI);
    let result = orch.analyze(request, RunOptions::default()).await.unwrap();

    assert_eq!(result.executive_summary(), "From openai.");
    assert_eq!(gemini.calls(), 0);
}

// ============================================================================
// Progress and terminal events
// ============================================================================

#[tokio::test]
async fn test_progress_is_monotonic_with_single_terminal() {
    let gemini = ScriptedProvider::new(
        ProviderType::Gemini,
        vec![Step::Fail(timeout_error()), Step::Reply(FENCED_KEYWORD)],
    );
    let orch = Arc::new(orchestrator(vec![gemini]));

    let events = run_events(&orch, keyword("cold brew")).await;
    let progress = progress_values(&events);

    assert_eq!(progress.first(), Some(&5));
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "progress went backwards: {:?}", progress);
    assert!(progress.iter().all(|p| *p <= 100));
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert!(events.last().unwrap().is_terminal());
}

// ============================================================================
// Cache
// ============================================================================

#[tokio::test]
async fn test_second_request_is_served_from_cache() {
    let gemini = ScriptedProvider::new(ProviderType::Gemini, vec![Step::Reply(FENCED_KEYWORD)]);
    let cache = Arc::new(MemoryResponseCache::from_settings(&CacheSettings::default()));
    let orch = Arc::new(
        orchestrator(vec![gemini.clone()]).with_cache(cache.clone(), CacheSettings::default()),
    );

    let first = orch.analyze(keyword("Cold Brew"), RunOptions::default()).await.unwrap();
    let second = orch.analyze(keyword("cold brew"), RunOptions::default()).await.unwrap();

    assert_eq!(gemini.calls(), 1);
    assert_eq!(first.executive_summary(), second.executive_summary());
    assert_eq!(first.target_keyword(), "Cold Brew");
    assert_eq!(second.target_keyword(), "cold brew");
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);

    orch.analyze(keyword("cold brew"), RunOptions { bypass_cache: true })
        .await
        .unwrap();
    assert_eq!(gemini.calls(), 2);
}

#[tokio::test]
async fn test_zero_ttl_type_is_never_cached() {
    let gemini = ScriptedProvider::new(ProviderType::Gemini, vec![Step::Reply(FENCED_KEYWORD)]);
    let ttls = CacheSettings {
        keyword_ttl_secs: 0,
        ..CacheSettings::default()
    };
    let cache = Arc::new(MemoryResponseCache::new(16, Duration::from_secs(60)));
    let orch = Arc::new(orchestrator(vec![gemini.clone()]).with_cache(cache.clone(), ttls));

    orch.analyze(keyword("cold brew"), RunOptions::default()).await.unwrap();
    orch.analyze(keyword("cold brew"), RunOptions::default()).await.unwrap();

    assert_eq!(gemini.calls(), 2);
    assert_eq!(cache.entry_count(), 0);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancel_mid_attempt_emits_cancelled_and_skips_cache() {
    let gemini = ScriptedProvider::new(ProviderType::Gemini, vec![Step::Hang]);
    let cache = Arc::new(MemoryResponseCache::new(16, Duration::from_secs(60)));
    let orch = Arc::new(
        orchestrator(vec![gemini.clone()]).with_cache(cache.clone(), CacheSettings::default()),
    );

    let mut stream = orch.stream(keyword("cold brew"), RunOptions::default());
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        let started = matches!(event, StreamEvent::Progress { progress, .. } if progress >= 20);
        events.push(event);
        if started {
            stream.cancel();
        }
    }

    match events.last().unwrap() {
        StreamEvent::Error { kind, .. } => assert_eq!(*kind, ErrorKind::Cancelled),
        other => panic!("expected cancelled error, got {:?}", other),
    }
    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    assert_eq!(gemini.calls(), 1);
    assert_eq!(cache.entry_count(), 0);
}

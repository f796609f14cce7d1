//! Analysis Orchestrator
//!
//! Runs one analysis request end to end and reports it as a stream of
//! [`StreamEvent`]s:
//!
//! 1. cache lookup (a hit completes immediately)
//! 2. prompt construction
//! 3. provider chain with retries and fallback, forwarding sentences as the
//!    completion streams in
//! 4. JSON extraction and normalization
//! 5. cache write and the terminal `complete` event
//!
//! Every stream ends with exactly one terminal event and progress never goes
//! backwards. The first progress event carries the request's task id, which
//! can be polled through the [`ProgressRegistry`]; finished runs feed
//! [`PipelineMetrics`].
//!
//! Dropping the receiving side cancels the request: the in-flight provider
//! call is abandoned, no further provider is tried and nothing is written to
//! the cache.

use async_trait::async_trait;
use futures_util::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info};

use market_lens_core::{PromptBundle, UnifiedStreamEvent};
use market_lens_llm::{CompletionOptions, LlmError, LlmProvider, ProviderType};

use super::cache::{CacheKey, ResponseCache};
use super::fallback::{
    run_chain, AttemptRunner, ChainError, ClassifiedError, ProviderAttempt, RetryPolicy,
};
use super::json_extractor::{extract, RepairRung};
use super::metrics::{PipelineMetrics, RunOutcome};
use super::normalizer::normalize;
use super::progress::{
    milestones, streaming_percent, ProgressRegistry, ProgressStatus, ProgressTracker,
};
use super::prompt_builder::PromptBuilder;
use super::registry::build_provider_chain;
use super::sentences::{Sentence, SentenceSplitter};
use crate::models::analysis::AnalysisRequest;
use crate::models::analysis_result::NormalizedResult;
use crate::models::settings::{AppConfig, CacheSettings};
use crate::models::stream_event::{ErrorKind, StreamEvent};
use crate::utils::error::{AppError, AppResult};
use crate::utils::redact::redact_secrets;

/// Buffer between the orchestrator task and the consumer
const EVENT_BUFFER: usize = 64;

/// Buffer between a provider and the attempt runner
const DELTA_BUFFER: usize = 128;

/// A progress event is sent after this many sentences
const SENTENCES_PER_PROGRESS: usize = 5;

// ============================================================================
// Event sink
// ============================================================================

/// Sending side of one request's event stream.
///
/// Applies monotonic clamping to progress and lets only the first terminal
/// event through. A closed receiver cancels the request. Every update is
/// published to the progress registry and the terminal event is recorded in
/// the metrics.
struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
    tracker: ProgressTracker,
    registry: ProgressRegistry,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
    terminated: bool,
    from_cache: bool,
}

impl EventSink {
    fn new(
        tx: mpsc::Sender<StreamEvent>,
        tracker: ProgressTracker,
        registry: ProgressRegistry,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            tracker,
            registry,
            metrics,
            cancel,
            terminated: false,
            from_cache: false,
        }
    }

    async fn send(&mut self, event: StreamEvent) {
        if self.terminated {
            return;
        }
        if event.is_terminal() {
            self.terminated = true;
            self.finish(&event).await;
        }
        if self.tx.send(event).await.is_err() && !self.cancel.is_cancelled() {
            debug!(task_id = self.tracker.task_id(), "event receiver dropped, cancelling");
            self.cancel.cancel();
        }
    }

    async fn finish(&mut self, event: &StreamEvent) {
        let (status, note, outcome) = match event {
            StreamEvent::Complete { .. } => (
                ProgressStatus::Completed,
                "complete".to_string(),
                RunOutcome::Completed {
                    cached: self.from_cache,
                },
            ),
            StreamEvent::Error {
                kind: ErrorKind::Cancelled,
                message,
            } => (ProgressStatus::Cancelled, message.clone(), RunOutcome::Cancelled),
            StreamEvent::Error { kind, message } => (
                ProgressStatus::Failed,
                message.clone(),
                RunOutcome::Failed {
                    kind: *kind,
                    message: message.clone(),
                },
            ),
            StreamEvent::Progress { .. } | StreamEvent::Sentence { .. } => return,
        };
        self.tracker.finish(status, note);
        self.registry.publish(self.tracker.snapshot());
        self.metrics
            .record_outcome(outcome, self.tracker.elapsed_ms())
            .await;
    }

    async fn progress(&mut self, percent: u8, message: impl Into<String>) {
        let message = message.into();
        let first = self.tracker.is_fresh();
        let applied = self.tracker.update(percent, message.clone());
        self.registry.publish(self.tracker.snapshot());

        let mut event = StreamEvent::progress(applied, message);
        if first {
            event = event.with_task_id(self.tracker.task_id());
        }
        self.send(event).await;
    }

    async fn sentence(&mut self, sentence: Sentence) {
        self.send(StreamEvent::Sentence {
            content: sentence.content,
            section: sentence.section,
        })
        .await;
    }

    async fn complete(&mut self, result: NormalizedResult) {
        self.send(StreamEvent::complete(result)).await;
    }

    async fn error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.send(StreamEvent::error(kind, message)).await;
    }

    async fn cancelled(&mut self) {
        self.error(ErrorKind::Cancelled, "request cancelled").await;
    }
}

// ============================================================================
// Attempt runner
// ============================================================================

/// Extracted JSON and the repair rung that produced it (`None` when the
/// provider returned structured output directly)
#[derive(Debug)]
struct Extracted {
    value: Value,
    rung: Option<RepairRung>,
}

/// Streams one provider attempt into the sink and extracts its JSON
struct PipelineAttempt<'a> {
    sink: &'a mut EventSink,
    prompt: &'a PromptBundle,
    options: &'a CompletionOptions,
    cancel: &'a CancellationToken,
}

#[async_trait]
impl<'a> AttemptRunner for PipelineAttempt<'a> {
    type Output = Extracted;

    async fn run_attempt(
        &mut self,
        provider: &Arc<dyn LlmProvider>,
        record: &mut ProviderAttempt,
        budget: Duration,
    ) -> Result<Extracted, ClassifiedError> {
        let prompt = self.prompt;
        let options = self.options;
        let cancel = self.cancel;
        let sink = &mut *self.sink;

        sink.progress(
            milestones::PROVIDER_STARTED,
            format!("calling {} ({})", provider.name(), provider.model()),
        )
        .await;

        let (delta_tx, mut delta_rx) = mpsc::channel::<UnifiedStreamEvent>(DELTA_BUFFER);

        let call = async move {
            tokio::select! {
                res = tokio::time::timeout(budget, provider.complete(prompt, options, delta_tx)) => {
                    match res {
                        Ok(inner) => inner,
                        Err(_) => Err(LlmError::Timeout {
                            message: format!("attempt exceeded {}ms", budget.as_millis()),
                        }),
                    }
                }
                _ = cancel.cancelled() => Err(LlmError::Cancelled),
            }
        };

        let consume = async {
            let mut splitter = SentenceSplitter::new();
            let mut sentences = 0usize;
            while let Some(event) = delta_rx.recv().await {
                let UnifiedStreamEvent::TextDelta { content } = event else {
                    continue;
                };
                if content.is_empty() {
                    continue;
                }
                if record.raw_text.is_empty() {
                    record.mark_streaming();
                    sink.progress(milestones::FIRST_BYTES, "receiving response")
                        .await;
                }
                record.push_text(&content);
                for sentence in splitter.feed(&content) {
                    sentences += 1;
                    sink.sentence(sentence).await;
                    if sentences % SENTENCES_PER_PROGRESS == 0 {
                        sink.progress(
                            streaming_percent(sentences),
                            format!("{} sentences received", sentences),
                        )
                        .await;
                    }
                }
            }
            for sentence in splitter.finish() {
                sink.sentence(sentence).await;
            }
        };

        let (result, ()) = tokio::join!(call, consume);
        let response = result.map_err(|e| ClassifiedError::from_llm(&e))?;
        if cancel.is_cancelled() {
            return Err(ClassifiedError::cancelled());
        }

        sink.progress(
            milestones::PROVIDER_FINISHED,
            format!("{} finished", provider.name()),
        )
        .await;

        if let Some(value @ Value::Object(_)) = response.structured {
            sink.progress(milestones::EXTRACTED, "structured output received")
                .await;
            return Ok(Extracted { value, rung: None });
        }

        let text = match response.content {
            Some(content) if !content.trim().is_empty() => content,
            _ => record.raw_text.clone(),
        };
        match extract(&text) {
            Ok(extraction) => {
                sink.progress(
                    milestones::EXTRACTED,
                    format!("JSON extracted at {}", extraction.rung),
                )
                .await;
                Ok(Extracted {
                    value: extraction.value,
                    rung: Some(extraction.rung),
                })
            }
            Err(e) => Err(ClassifiedError::extraction(&e)),
        }
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

/// Per-call switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Skip both the cache read and the cache write
    pub bypass_cache: bool,
}

pub struct AnalysisOrchestrator {
    providers: Vec<Arc<dyn LlmProvider>>,
    cache: Option<Arc<dyn ResponseCache>>,
    cache_ttls: CacheSettings,
    prompt_builder: PromptBuilder,
    policy: RetryPolicy,
    completion: CompletionOptions,
    progress: ProgressRegistry,
    metrics: Arc<PipelineMetrics>,
}

impl AnalysisOrchestrator {
    pub fn new(
        providers: Vec<Arc<dyn LlmProvider>>,
        prompt_builder: PromptBuilder,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            providers,
            cache: None,
            cache_ttls: CacheSettings::default(),
            prompt_builder,
            policy,
            completion: CompletionOptions::default(),
            progress: ProgressRegistry::default(),
            metrics: Arc::new(PipelineMetrics::new()),
        }
    }

    /// Build the provider chain and policies from configuration.
    pub fn from_config(
        config: &AppConfig,
        cache: Option<Arc<dyn ResponseCache>>,
    ) -> AppResult<Self> {
        let providers = build_provider_chain(config)?;
        let mut orchestrator = Self::new(
            providers,
            PromptBuilder::from_settings(&config.prompt),
            RetryPolicy::from_config(config),
        );
        if let Some(cache) = cache {
            orchestrator = orchestrator.with_cache(cache, config.cache.clone());
        }
        Ok(orchestrator)
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResponseCache>, ttls: CacheSettings) -> Self {
        self.cache = Some(cache);
        self.cache_ttls = ttls;
        self
    }

    pub fn with_completion_options(mut self, options: CompletionOptions) -> Self {
        self.completion = options;
        self
    }

    /// Provider ids in chain order
    pub fn provider_names(&self) -> Vec<&'static str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn providers(&self) -> &[Arc<dyn LlmProvider>] {
        &self.providers
    }

    /// Snapshots of recent requests by task id
    pub fn progress(&self) -> &ProgressRegistry {
        &self.progress
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// Chain order for one request: the preferred provider, when present,
    /// moves to the front and the rest keep their configured order.
    fn provider_order(&self, preference: Option<ProviderType>) -> Vec<Arc<dyn LlmProvider>> {
        let mut order = self.providers.clone();
        if let Some(preferred) = preference {
            if let Some(pos) = order.iter().position(|p| p.provider_type() == preferred) {
                let provider = order.remove(pos);
                order.insert(0, provider);
            }
        }
        order
    }

    /// Run one request, sending every event into `tx`.
    pub async fn run(
        &self,
        request: AnalysisRequest,
        options: RunOptions,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        self.run_tracked(ProgressTracker::new(), request, options, tx, cancel)
            .await;
    }

    async fn run_tracked(
        &self,
        tracker: ProgressTracker,
        request: AnalysisRequest,
        options: RunOptions,
        tx: mpsc::Sender<StreamEvent>,
        cancel: CancellationToken,
    ) {
        let mut sink = EventSink::new(
            tx,
            tracker,
            self.progress.clone(),
            Arc::clone(&self.metrics),
            cancel.clone(),
        );
        let analysis_type = request.analysis_type();
        info!(
            task_id = sink.tracker.task_id(),
            subject = request.target_subject(),
            analysis_type = %analysis_type,
            "analysis started"
        );
        sink.progress(milestones::ACCEPTED, "request accepted").await;

        let cache = self.cache.as_ref().filter(|_| !options.bypass_cache);
        let cache_key = cache.map(|_| CacheKey::for_request(&request));

        if let (Some(cache), Some(key)) = (cache, cache_key.as_ref()) {
            if let Some(hit) = cache.get(key).await {
                info!(task_id = sink.tracker.task_id(), key = %key, "cache hit");
                sink.progress(milestones::NORMALIZED, "loaded from cache")
                    .await;
                sink.from_cache = true;
                sink.complete(hit.with_target_keyword(request.target_subject()))
                    .await;
                return;
            }
        }
        if cancel.is_cancelled() {
            sink.cancelled().await;
            return;
        }

        let prompt = self.prompt_builder.build(&request);
        sink.progress(
            milestones::PROMPT_BUILT,
            format!("prompt built (~{} tokens)", prompt.estimated_tokens()),
        )
        .await;

        let providers = self.provider_order(request.provider_preference());
        if providers.is_empty() {
            error!(task_id = sink.tracker.task_id(), "no providers configured");
            sink.error(ErrorKind::ProviderExhausted, "no analysis providers are configured")
                .await;
            return;
        }

        let outcome = {
            let mut runner = PipelineAttempt {
                sink: &mut sink,
                prompt: &prompt,
                options: &self.completion,
                cancel: &cancel,
            };
            run_chain(&providers, &self.policy, &cancel, &mut runner).await
        };
        let attempts = match &outcome {
            Ok(success) => success.attempts.as_slice(),
            Err(err) => err.attempts(),
        };
        self.metrics.record_attempts(attempts).await;

        match outcome {
            Ok(success) => {
                let result = normalize(&success.output.value, analysis_type)
                    .with_target_keyword(request.target_subject());
                sink.progress(milestones::NORMALIZED, "result normalized")
                    .await;

                if cancel.is_cancelled() {
                    sink.cancelled().await;
                    return;
                }
                if let (Some(cache), Some(key)) = (cache, cache_key) {
                    cache
                        .set(key, result.clone(), self.cache_ttls.ttl_for(analysis_type))
                        .await;
                }
                info!(
                    task_id = sink.tracker.task_id(),
                    provider = %success.provider_id,
                    attempts = success.attempts.len(),
                    rung = success.output.rung.map(|r| r.number()),
                    elapsed_ms = sink.tracker.elapsed_ms(),
                    "analysis completed"
                );
                sink.complete(result).await;
            }
            Err(ChainError::Cancelled { attempts }) => {
                info!(
                    task_id = sink.tracker.task_id(),
                    attempts = attempts.len(),
                    "analysis cancelled"
                );
                sink.cancelled().await;
            }
            Err(err @ ChainError::Exhausted { .. }) => {
                let kind = match err {
                    ChainError::Exhausted {
                        deadline_exceeded: true,
                        ..
                    } => ErrorKind::Timeout,
                    _ => ErrorKind::ProviderExhausted,
                };
                let message = redact_secrets(&err.to_string());
                error!(
                    task_id = sink.tracker.task_id(),
                    kind = %kind,
                    error = %message,
                    "analysis failed"
                );
                sink.error(kind, message).await;
            }
        }
    }

    /// Spawn a request and return its event stream.
    pub fn stream(self: &Arc<Self>, request: AnalysisRequest, options: RunOptions) -> AnalysisStream {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let cancel = CancellationToken::new();
        let tracker = ProgressTracker::new();
        let task_id = tracker.task_id().to_string();
        self.progress.publish(tracker.snapshot());

        let orchestrator = Arc::clone(self);
        let task_cancel = cancel.clone();
        let panic_tx = tx.clone();
        let run = tokio::spawn(async move {
            orchestrator
                .run_tracked(tracker, request, options, tx, task_cancel)
                .await;
        });
        let failed_task = task_id.clone();
        tokio::spawn(async move {
            if let Err(e) = run.await {
                if e.is_panic() {
                    error!(task_id = %failed_task, "analysis task panicked");
                    let _ = panic_tx
                        .send(StreamEvent::error(
                            ErrorKind::Internal,
                            "analysis task failed unexpectedly",
                        ))
                        .await;
                }
            }
        });
        AnalysisStream {
            inner: ReceiverStream::new(rx),
            task_id,
            cancel: cancel.clone(),
            _guard: cancel.drop_guard(),
        }
    }

    /// Run a request and wait for its terminal event.
    pub async fn analyze(
        self: &Arc<Self>,
        request: AnalysisRequest,
        options: RunOptions,
    ) -> AppResult<NormalizedResult> {
        collect_terminal(self.stream(request, options)).await
    }
}

// ============================================================================
// Stream handle
// ============================================================================

/// Event stream of one running request. Dropping it cancels the request.
pub struct AnalysisStream {
    inner: ReceiverStream<StreamEvent>,
    task_id: String,
    cancel: CancellationToken,
    _guard: DropGuard,
}

impl AnalysisStream {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Stream for AnalysisStream {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

/// Drain a stream down to its terminal event.
pub async fn collect_terminal<S>(mut stream: S) -> AppResult<NormalizedResult>
where
    S: Stream<Item = StreamEvent> + Unpin,
{
    use futures_util::StreamExt;

    while let Some(event) = stream.next().await {
        match event {
            StreamEvent::Complete { data } => return Ok(*data),
            StreamEvent::Error {
                message,
                kind: ErrorKind::Internal,
            } => return Err(AppError::internal(message)),
            StreamEvent::Error { message, kind } => return Err(AppError::analysis(kind, message)),
            StreamEvent::Progress { .. } | StreamEvent::Sentence { .. } => {}
        }
    }
    Err(AppError::stream("event stream closed without a terminal event"))
}

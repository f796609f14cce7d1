//! Provider Fallback Chain
//!
//! Drives one request across the ordered provider list. Each provider gets a
//! bounded number of attempts; transient failures are retried with capped
//! exponential backoff, anything else moves on to the next provider. The
//! whole chain shares one request deadline. Local providers always get their
//! single attempt, even after the deadline has passed, so the chain can still
//! end in a usable result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use market_lens_llm::{LlmError, LlmProvider};

use super::json_extractor::ExtractionError;
use crate::models::settings::AppConfig;
use crate::utils::redact::redact_secrets;

// ============================================================================
// Failure classification
// ============================================================================

/// How the chain reacts to a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Same provider may be retried after a backoff
    Transient,
    /// Provider cannot serve this request; move on
    Fatal,
    /// Provider answered but the output held no usable JSON
    Extraction,
    /// Caller went away
    Cancelled,
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Transient => write!(f, "transient"),
            FailureKind::Fatal => write!(f, "fatal"),
            FailureKind::Extraction => write!(f, "extraction"),
            FailureKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl FailureKind {
    pub fn should_retry(&self) -> bool {
        matches!(self, FailureKind::Transient)
    }
}

/// A failed attempt, reduced to what the chain needs to decide
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedError {
    pub kind: FailureKind,
    /// Stable label such as `timeout` or `rate_limited`
    pub label: &'static str,
    pub message: String,
    /// Provider-suggested wait before the next attempt
    pub retry_after: Option<Duration>,
}

impl ClassifiedError {
    pub fn from_llm(err: &LlmError) -> Self {
        let kind = match err {
            LlmError::Cancelled => FailureKind::Cancelled,
            e if e.is_retryable() => FailureKind::Transient,
            _ => FailureKind::Fatal,
        };
        Self {
            kind,
            label: err.kind(),
            message: err.to_string(),
            retry_after: err.retry_after_secs().map(Duration::from_secs),
        }
    }

    pub fn extraction(err: &ExtractionError) -> Self {
        Self {
            kind: FailureKind::Extraction,
            label: "extraction_failed",
            message: err.to_string(),
            retry_after: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            kind: FailureKind::Cancelled,
            label: "cancelled",
            message: "request cancelled".to_string(),
            retry_after: None,
        }
    }
}

// ============================================================================
// Attempt records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStatus {
    Pending,
    Streaming,
    Succeeded,
    Failed,
}

/// Record of one call to one provider
#[derive(Debug, Clone, Serialize)]
pub struct ProviderAttempt {
    pub provider_id: String,
    /// 1-based attempt number for this provider
    pub attempt: u32,
    pub status: AttemptStatus,
    /// Text received so far
    #[serde(skip)]
    pub raw_text: String,
    pub error_kind: Option<FailureKind>,
    pub error_label: Option<String>,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub latency_ms: Option<u64>,
    #[serde(skip)]
    started: Instant,
}

impl ProviderAttempt {
    pub fn new(provider_id: impl Into<String>, attempt: u32) -> Self {
        Self {
            provider_id: provider_id.into(),
            attempt,
            status: AttemptStatus::Pending,
            raw_text: String::new(),
            error_kind: None,
            error_label: None,
            started_at: chrono::Utc::now().to_rfc3339(),
            ended_at: None,
            latency_ms: None,
            started: Instant::now(),
        }
    }

    pub fn mark_streaming(&mut self) {
        if self.status == AttemptStatus::Pending {
            self.status = AttemptStatus::Streaming;
        }
    }

    pub fn push_text(&mut self, text: &str) {
        self.raw_text.push_str(text);
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn finish(&mut self, status: AttemptStatus) {
        self.status = status;
        self.ended_at = Some(chrono::Utc::now().to_rfc3339());
        self.latency_ms = Some(self.elapsed_ms());
    }

    fn succeed(&mut self) {
        self.finish(AttemptStatus::Succeeded);
    }

    fn fail(&mut self, err: &ClassifiedError) {
        self.error_kind = Some(err.kind);
        self.error_label = Some(err.label.to_string());
        self.finish(AttemptStatus::Failed);
    }
}

// ============================================================================
// Retry policy
// ============================================================================

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries per network provider after its first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Budget for a single attempt
    pub attempt_timeout: Duration,
    /// Budget for the whole chain
    pub request_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_retries: config.retry.max_retries,
            base_delay: Duration::from_millis(config.retry.base_delay_ms),
            max_delay: Duration::from_millis(config.retry.max_delay_ms),
            attempt_timeout: config.timeouts.attempt(),
            request_timeout: config.timeouts.request(),
        }
    }

    /// Wait before retry number `retry` (0-based). A provider hint wins over
    /// the exponential schedule; both are capped at `max_delay`.
    pub fn backoff(&self, retry: u32, hint: Option<Duration>) -> Duration {
        let exponential = self
            .base_delay
            .saturating_mul(1u32.checked_shl(retry).unwrap_or(u32::MAX));
        hint.unwrap_or(exponential).min(self.max_delay)
    }
}

// ============================================================================
// Chain driver
// ============================================================================

/// Runs one attempt against one provider
#[async_trait]
pub trait AttemptRunner: Send {
    type Output: Send;

    async fn run_attempt(
        &mut self,
        provider: &Arc<dyn LlmProvider>,
        record: &mut ProviderAttempt,
        budget: Duration,
    ) -> Result<Self::Output, ClassifiedError>;
}

#[derive(Debug)]
pub struct ChainSuccess<T> {
    pub output: T,
    pub provider_id: String,
    pub attempts: Vec<ProviderAttempt>,
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("all providers failed: {}", summarize(.attempts))]
    Exhausted {
        attempts: Vec<ProviderAttempt>,
        deadline_exceeded: bool,
    },

    #[error("request cancelled")]
    Cancelled { attempts: Vec<ProviderAttempt> },
}

impl ChainError {
    pub fn attempts(&self) -> &[ProviderAttempt] {
        match self {
            ChainError::Exhausted { attempts, .. } | ChainError::Cancelled { attempts } => attempts,
        }
    }
}

/// `gemini#1 timeout, openai#1 authentication_failed`
pub fn summarize(attempts: &[ProviderAttempt]) -> String {
    if attempts.is_empty() {
        return "no provider was attempted".to_string();
    }
    attempts
        .iter()
        .map(|a| {
            format!(
                "{}#{} {}",
                a.provider_id,
                a.attempt,
                a.error_label.as_deref().unwrap_or("ok")
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Try each provider in order until one produces an output.
pub async fn run_chain<R: AttemptRunner>(
    providers: &[Arc<dyn LlmProvider>],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    runner: &mut R,
) -> Result<ChainSuccess<R::Output>, ChainError> {
    let deadline = Instant::now() + policy.request_timeout;
    let mut attempts: Vec<ProviderAttempt> = Vec::new();
    let mut deadline_exceeded = false;

    for provider in providers {
        let local = provider.is_local();
        let max_attempts = if local { 1 } else { policy.max_retries + 1 };

        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return Err(ChainError::Cancelled { attempts });
            }

            let budget = if local {
                policy.attempt_timeout
            } else {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    deadline_exceeded = true;
                    warn!(
                        provider = provider.name(),
                        "request deadline reached, skipping provider"
                    );
                    break;
                }
                policy.attempt_timeout.min(remaining)
            };

            debug!(
                provider = provider.name(),
                attempt,
                budget_ms = budget.as_millis() as u64,
                "starting provider attempt"
            );
            let mut record = ProviderAttempt::new(provider.name(), attempt);

            match runner.run_attempt(provider, &mut record, budget).await {
                Ok(output) => {
                    record.succeed();
                    info!(
                        provider = provider.name(),
                        attempt,
                        latency_ms = record.latency_ms.unwrap_or_default(),
                        "provider attempt succeeded"
                    );
                    attempts.push(record);
                    return Ok(ChainSuccess {
                        output,
                        provider_id: provider.name().to_string(),
                        attempts,
                    });
                }
                Err(err) => {
                    record.fail(&err);
                    warn!(
                        provider = provider.name(),
                        attempt,
                        kind = %err.kind,
                        label = err.label,
                        latency_ms = record.latency_ms.unwrap_or_default(),
                        error = %redact_secrets(&err.message),
                        "provider attempt failed"
                    );
                    attempts.push(record);

                    if err.kind == FailureKind::Cancelled {
                        return Err(ChainError::Cancelled { attempts });
                    }
                    if !err.kind.should_retry() || attempt == max_attempts {
                        break;
                    }

                    let wait = policy.backoff(attempt - 1, err.retry_after);
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if wait >= remaining {
                        deadline_exceeded = true;
                        warn!(
                            provider = provider.name(),
                            wait_ms = wait.as_millis() as u64,
                            "no time left to retry, moving to next provider"
                        );
                        break;
                    }

                    warn!(
                        provider = provider.name(),
                        attempt,
                        wait_ms = wait.as_millis() as u64,
                        "retrying after backoff"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = cancel.cancelled() => {
                            return Err(ChainError::Cancelled { attempts });
                        }
                    }
                }
            }
        }
    }

    Err(ChainError::Exhausted {
        attempts,
        deadline_exceeded,
    })
}

//! Pipeline Metrics
//!
//! Rolling counters for finished analyses and for the provider attempts
//! behind them. Response times and errors live in bounded buffers where the
//! oldest samples drop first.

use std::collections::{BTreeMap, VecDeque};

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::fallback::{AttemptStatus, ProviderAttempt};
use crate::models::stream_event::ErrorKind;

const MAX_RESPONSE_TIMES: usize = 1_000;
const MAX_ERRORS: usize = 500;
const RECENT_ERRORS: usize = 10;

/// How one analysis ended
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed { cached: bool },
    Failed { kind: ErrorKind, message: String },
    Cancelled,
}

/// A failed analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedError {
    pub kind: ErrorKind,
    pub message: String,
    pub timestamp: String,
}

/// Attempt counters for one provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderMetrics {
    pub attempts: u64,
    pub failures: u64,
    pub avg_latency_ms: f64,
}

/// Snapshot served by the metrics endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub total_calls: u64,
    pub total_errors: u64,
    pub cancelled: u64,
    pub cache_hits: u64,
    /// Failed calls as a percentage of all calls
    pub error_rate: f64,
    /// Seconds, over the retained response-time window
    pub avg_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    pub providers: BTreeMap<String, ProviderMetrics>,
    /// Newest last
    pub recent_errors: Vec<RecordedError>,
}

#[derive(Debug, Default)]
struct ProviderTotals {
    attempts: u64,
    failures: u64,
    latency_sum_ms: u64,
    latency_samples: u64,
}

#[derive(Debug, Default)]
struct MetricsState {
    total_calls: u64,
    total_errors: u64,
    cancelled: u64,
    cache_hits: u64,
    response_times_ms: VecDeque<u64>,
    errors: VecDeque<RecordedError>,
    providers: BTreeMap<String, ProviderTotals>,
}

#[derive(Debug, Default)]
pub struct PipelineMetrics {
    state: RwLock<MetricsState>,
}

fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn ms_to_secs(ms: f64) -> f64 {
    round_to(ms / 1_000.0, 3)
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the end of one analysis.
    pub async fn record_outcome(&self, outcome: RunOutcome, elapsed_ms: u64) {
        let mut state = self.state.write().await;
        state.total_calls += 1;

        match outcome {
            RunOutcome::Completed { cached } => {
                if cached {
                    state.cache_hits += 1;
                }
                if state.response_times_ms.len() == MAX_RESPONSE_TIMES {
                    state.response_times_ms.pop_front();
                }
                state.response_times_ms.push_back(elapsed_ms);
            }
            RunOutcome::Failed { kind, message } => {
                state.total_errors += 1;
                if state.errors.len() == MAX_ERRORS {
                    state.errors.pop_front();
                }
                state.errors.push_back(RecordedError {
                    kind,
                    message,
                    timestamp: chrono::Utc::now().to_rfc3339(),
                });
            }
            RunOutcome::Cancelled => state.cancelled += 1,
        }
    }

    /// Record the finished attempts of one provider chain.
    pub async fn record_attempts(&self, attempts: &[ProviderAttempt]) {
        let mut state = self.state.write().await;
        for attempt in attempts {
            let totals = state
                .providers
                .entry(attempt.provider_id.clone())
                .or_default();
            totals.attempts += 1;
            if attempt.status == AttemptStatus::Failed {
                totals.failures += 1;
            }
            if let Some(latency) = attempt.latency_ms {
                totals.latency_sum_ms += latency;
                totals.latency_samples += 1;
            }
        }
    }

    pub async fn summary(&self) -> MetricsSummary {
        let state = self.state.read().await;

        let times = &state.response_times_ms;
        let (avg, min, max) = if times.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            let sum: u64 = times.iter().sum();
            (
                ms_to_secs(sum as f64 / times.len() as f64),
                ms_to_secs(times.iter().copied().min().unwrap_or_default() as f64),
                ms_to_secs(times.iter().copied().max().unwrap_or_default() as f64),
            )
        };

        let error_rate = if state.total_calls == 0 {
            0.0
        } else {
            round_to(
                state.total_errors as f64 / state.total_calls as f64 * 100.0,
                2,
            )
        };

        let providers = state
            .providers
            .iter()
            .map(|(id, totals)| {
                let avg_latency_ms = if totals.latency_samples == 0 {
                    0.0
                } else {
                    round_to(
                        totals.latency_sum_ms as f64 / totals.latency_samples as f64,
                        1,
                    )
                };
                (
                    id.clone(),
                    ProviderMetrics {
                        attempts: totals.attempts,
                        failures: totals.failures,
                        avg_latency_ms,
                    },
                )
            })
            .collect();

        let skip = state.errors.len().saturating_sub(RECENT_ERRORS);
        MetricsSummary {
            total_calls: state.total_calls,
            total_errors: state.total_errors,
            cancelled: state.cancelled,
            cache_hits: state.cache_hits,
            error_rate,
            avg_response_time: avg,
            min_response_time: min,
            max_response_time: max,
            providers,
            recent_errors: state.errors.iter().skip(skip).cloned().collect(),
        }
    }

    pub async fn reset(&self) {
        *self.state.write().await = MetricsState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(provider: &str, status: AttemptStatus, latency_ms: u64) -> ProviderAttempt {
        let mut attempt = ProviderAttempt::new(provider, 1);
        attempt.status = status;
        attempt.latency_ms = Some(latency_ms);
        attempt
    }

    #[tokio::test]
    async fn test_empty_summary_is_zeroed() {
        let summary = PipelineMetrics::new().summary().await;
        assert_eq!(summary.total_calls, 0);
        assert_eq!(summary.error_rate, 0.0);
        assert_eq!(summary.avg_response_time, 0.0);
        assert!(summary.recent_errors.is_empty());
    }

    #[tokio::test]
    async fn test_summary_counts_outcomes_and_times() {
        let metrics = PipelineMetrics::new();
        metrics
            .record_outcome(RunOutcome::Completed { cached: false }, 1_200)
            .await;
        metrics
            .record_outcome(RunOutcome::Completed { cached: true }, 300)
            .await;
        metrics
            .record_outcome(
                RunOutcome::Failed {
                    kind: ErrorKind::ProviderExhausted,
                    message: "all providers failed".to_string(),
                },
                5_000,
            )
            .await;

        let summary = metrics.summary().await;
        assert_eq!(summary.total_calls, 3);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.error_rate, 33.33);
        assert_eq!(summary.avg_response_time, 0.75);
        assert_eq!(summary.min_response_time, 0.3);
        assert_eq!(summary.max_response_time, 1.2);
        assert_eq!(summary.recent_errors.len(), 1);
        assert_eq!(summary.recent_errors[0].kind, ErrorKind::ProviderExhausted);
    }

    #[tokio::test]
    async fn test_cancelled_runs_are_not_errors() {
        let metrics = PipelineMetrics::new();
        metrics.record_outcome(RunOutcome::Cancelled, 10).await;
        let summary = metrics.summary().await;
        assert_eq!(summary.total_calls, 1);
        assert_eq!(summary.cancelled, 1);
        assert_eq!(summary.total_errors, 0);
        assert_eq!(summary.avg_response_time, 0.0);
    }

    #[tokio::test]
    async fn test_recent_errors_keep_newest_ten() {
        let metrics = PipelineMetrics::new();
        for i in 0..15 {
            metrics
                .record_outcome(
                    RunOutcome::Failed {
                        kind: ErrorKind::Timeout,
                        message: format!("failure {}", i),
                    },
                    1,
                )
                .await;
        }
        let summary = metrics.summary().await;
        assert_eq!(summary.total_errors, 15);
        assert_eq!(summary.recent_errors.len(), 10);
        assert_eq!(summary.recent_errors[0].message, "failure 5");
        assert_eq!(summary.recent_errors[9].message, "failure 14");
    }

    #[tokio::test]
    async fn test_provider_attempts_and_latency() {
        let metrics = PipelineMetrics::new();
        metrics
            .record_attempts(&[
                attempt("gemini", AttemptStatus::Failed, 100),
                attempt("gemini", AttemptStatus::Failed, 200),
                attempt("openai", AttemptStatus::Succeeded, 50),
            ])
            .await;

        let summary = metrics.summary().await;
        let gemini = &summary.providers["gemini"];
        assert_eq!(gemini.attempts, 2);
        assert_eq!(gemini.failures, 2);
        assert_eq!(gemini.avg_latency_ms, 150.0);
        assert_eq!(summary.providers["openai"].failures, 0);
    }

    #[tokio::test]
    async fn test_reset_clears_everything() {
        let metrics = PipelineMetrics::new();
        metrics
            .record_outcome(RunOutcome::Completed { cached: false }, 10)
            .await;
        metrics
            .record_attempts(&[attempt("offline", AttemptStatus::Succeeded, 1)])
            .await;
        metrics.reset().await;

        let summary = metrics.summary().await;
        assert_eq!(summary.total_calls, 0);
        assert!(summary.providers.is_empty());
    }
}

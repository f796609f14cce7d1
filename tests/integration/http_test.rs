//! HTTP Integration Tests
//!
//! Exercises the router with a failing provider chain to check status
//! mapping and NDJSON error framing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use tower::ServiceExt;

use market_lens::services::analysis::{PromptBuilder, RetryPolicy};
use market_lens::{create_router, AnalysisOrchestrator, AppConfig, AppState};
use market_lens_core::{PromptBundle, UnifiedStreamEvent};
use market_lens_llm::{
    CompletionOptions, LlmError, LlmProvider, LlmResponse, LlmResult, ProviderConfig,
    ProviderType,
};

// ============================================================================
// Helpers
// ============================================================================

/// Always fails with a key-bearing upstream message.
struct BrokenProvider {
    config: ProviderConfig,
}

#[async_trait]
impl LlmProvider for BrokenProvider {
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
        _prompt: &PromptBundle,
        _options: &CompletionOptions,
        _tx: mpsc::Sender<UnifiedStreamEvent>,
    ) -> LlmResult<LlmResponse> {
        Err(LlmError::ServerError {
            message: "upstream rejected key sk-abcdefghijklmnopqrstuvwx".to_string(),
            status: Some(502),
        })
    }

    fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

fn broken_router() -> axum::Router {
    let provider: Arc<dyn LlmProvider> = Arc::new(BrokenProvider {
        config: ProviderConfig::new(ProviderType::OpenAI),
    });
    let orchestrator = AnalysisOrchestrator::new(
        vec![provider],
        PromptBuilder::default(),
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            attempt_timeout: Duration::from_secs(1),
            request_timeout: Duration::from_secs(2),
        },
    );
    create_router(AppState::from_parts(AppConfig::default(), Arc::new(orchestrator), None))
}

fn post_json(uri: &str, body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_exhausted_chain_maps_to_bad_gateway() {
    let response = broken_router()
        .oneshot(post_json("/api/target/analyze", r#"{"target_keyword": "ev"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(json["success"], false);
    assert!(json["error"].as_str().unwrap().contains("openai#1"));
}

#[tokio::test]
async fn test_stream_ends_with_single_error_event() {
    let response = broken_router()
        .oneshot(post_json(
            "/api/target/analyze/stream",
            r#"{"target_keyword": "ev", "target_type": "audience"}"#,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let text = body_text(response).await;
    assert!(!text.contains("sk-abcdefghijklmnopqrstuvwx"));

    let events: Vec<Value> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    let terminal: Vec<&Value> = events
        .iter()
        .filter(|e| e["type"] == "complete" || e["type"] == "error")
        .collect();
    assert_eq!(terminal.len(), 1);
    assert_eq!(events.last().unwrap()["type"], "error");
    assert_eq!(events.last().unwrap()["kind"], "provider_exhausted");
}

#[tokio::test]
async fn test_cache_stats_absent_without_cache() {
    let response = broken_router()
        .oneshot(Request::get("/api/cache/stats").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_missing_keyword_is_rejected() {
    let response = broken_router()
        .oneshot(post_json("/api/target/analyze", r#"{"target_keyword": "   "}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_analyze_maps_exhaustion_like_post() {
    let response = broken_router()
        .oneshot(
            Request::get("/api/target/analyze?target_keyword=ev&use_gemini=true")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_cache_clear_absent_without_cache() {
    let response = broken_router()
        .oneshot(Request::delete("/api/cache/clear").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_record_failed_runs() {
    let app = broken_router();
    let response = app
        .clone()
        .oneshot(post_json("/api/target/analyze", r#"{"target_keyword": "ev"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);

    let response = app
        .oneshot(Request::get("/api/metrics/summary").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
    let data = &json["data"];
    assert_eq!(data["total_calls"], 1);
    assert_eq!(data["total_errors"], 1);
    assert_eq!(data["error_rate"], 100.0);
    assert_eq!(data["providers"]["openai"]["failures"], 1);
    assert_eq!(data["recent_errors"][0]["kind"], "provider_exhausted");
    assert!(!data["recent_errors"][0]["message"]
        .as_str()
        .unwrap()
        .contains("sk-abcdefghijklmnopqrstuvwx"));
}

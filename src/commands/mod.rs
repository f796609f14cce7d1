//! HTTP Commands
//!
//! Axum router and handlers exposing the analysis pipeline.

pub mod analysis;
pub mod health;
pub mod monitoring;

use std::net::SocketAddr;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::state::AppState;
use crate::utils::error::AppResult;

pub use analysis::AnalyzeRequestBody;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route(
            "/target/analyze",
            get(analysis::analyze_query).post(analysis::analyze),
        )
        .route("/target/analyze/stream", post(analysis::analyze_stream))
        .route("/health", get(health::get_health))
        .route("/cache/stats", get(health::get_cache_stats))
        .route("/cache/clear", delete(health::clear_cache))
        .route("/metrics/summary", get(monitoring::get_metrics_summary))
        .route("/metrics/reset", post(monitoring::reset_metrics))
        .route("/progress/{task_id}", get(monitoring::get_progress));

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Serve until Ctrl-C.
pub async fn run_server(state: AppState, addr: SocketAddr) -> AppResult<()> {
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("market-lens listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::settings::AppConfig;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn router() -> Router {
        create_router(AppState::new(AppConfig::default()).unwrap())
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

    async fn get_json(app: &Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        (status, serde_json::from_str(&body_text(response).await).unwrap())
    }

    #[tokio::test]
    async fn test_health_reports_offline_chain() {
        let response = router()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["status"], "degraded");
        assert_eq!(json["data"]["providers"][0]["name"], "offline");
    }

    #[tokio::test]
    async fn test_sync_analyze_returns_envelope() {
        let response = router()
            .oneshot(post_json(
                "/api/target/analyze",
                r#"{"target_keyword": "oat milk", "target_type": "comprehensive"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["target_type"], "comprehensive");
        assert_eq!(json["data"]["target_keyword"], "oat milk");
    }

    #[tokio::test]
    async fn test_stream_is_ndjson_ending_in_complete() {
        let response = router()
            .oneshot(post_json(
                "/api/target/analyze/stream",
                r#"{"target_keyword": "oat milk"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/x-ndjson"
        );
        assert_eq!(response.headers()["x-accel-buffering"], "no");

        let text = body_text(response).await;
        let events: Vec<Value> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(events.first().unwrap()["type"], "progress");
        assert_eq!(events.last().unwrap()["type"], "complete");
        assert_eq!(events.last().unwrap()["data"]["target_type"], "keyword");
    }

    #[tokio::test]
    async fn test_invalid_request_is_bad_request() {
        let response = router()
            .oneshot(post_json(
                "/api/target/analyze/stream",
                r#"{"target_keyword": "ev", "start_date": "2024-13-01"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["success"], false);
    }

    #[tokio::test]
    async fn test_cache_stats_count_hits() {
        let app = router();
        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json(
                    "/api/target/analyze",
                    r#"{"target_keyword": "oat milk"}"#,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let response = app
            .oneshot(Request::get("/api/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["data"]["hits"], 1);
        assert_eq!(json["data"]["misses"], 1);
        assert_eq!(json["data"]["entries"], 1);
    }

    #[tokio::test]
    async fn test_get_analyze_reads_query_parameters() {
        let (status, json) = get_json(
            &router(),
            "/api/target/analyze?target_keyword=oat%20milk&target_type=audience&use_gemini=false",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["success"], true);
        assert_eq!(json["data"]["target_type"], "audience");
        assert_eq!(json["data"]["target_keyword"], "oat milk");
    }

    #[tokio::test]
    async fn test_get_analyze_rejects_bad_dates() {
        let response = router()
            .oneshot(
                Request::get("/api/target/analyze?target_keyword=ev&start_date=2024-13-01")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cache_clear_empties_store() {
        let app = router();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/target/analyze",
                r#"{"target_keyword": "oat milk"}"#,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(
                Request::delete("/api/cache/clear")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(json["data"]["cleared"], 1);

        let (_, stats) = get_json(&app, "/api/cache/stats").await;
        assert_eq!(stats["data"]["entries"], 0);
    }

    #[tokio::test]
    async fn test_metrics_summary_counts_calls() {
        let app = router();
        for body in [r#"{"target_keyword": "oat milk"}"#, r#"{"target_keyword": "oat milk"}"#] {
            let response = app
                .clone()
                .oneshot(post_json("/api/target/analyze", body))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let (status, json) = get_json(&app, "/api/metrics/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["total_calls"], 2);
        assert_eq!(json["data"]["total_errors"], 0);
        assert_eq!(json["data"]["cache_hits"], 1);
        assert_eq!(json["data"]["error_rate"], 0.0);
        assert_eq!(json["data"]["providers"]["offline"]["attempts"], 1);

        let response = app
            .clone()
            .oneshot(post_json("/api/metrics/reset", "{}"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let (_, json) = get_json(&app, "/api/metrics/summary").await;
        assert_eq!(json["data"]["total_calls"], 0);
    }

    #[tokio::test]
    async fn test_progress_is_polled_by_streamed_task_id() {
        let app = router();
        let response = app
            .clone()
            .oneshot(post_json(
                "/api/target/analyze/stream",
                r#"{"target_keyword": "oat milk"}"#,
            ))
            .await
            .unwrap();
        let text = body_text(response).await;
        let first: Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
        let task_id = first["task_id"].as_str().unwrap().to_string();

        let (status, json) = get_json(&app, &format!("/api/progress/{}", task_id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["data"]["task_id"], task_id.as_str());
        assert_eq!(json["data"]["status"], "completed");
        assert_eq!(json["data"]["percent"], 100);

        let (status, json) = get_json(&app, "/api/progress/unknown-task").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["success"], false);
    }
}

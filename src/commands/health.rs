//! Health Check Commands
//!
//! Service status and response cache management.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::models::response::{CacheClearResponse, CommandResponse, HealthResponse};
use crate::services::analysis::CacheStats;
use crate::state::AppState;

/// Get the health status and provider chain
pub async fn get_health(State(state): State<AppState>) -> Json<CommandResponse<HealthResponse>> {
    let mut health = HealthResponse::default();
    health.providers = state.provider_statuses();
    health.cache_enabled = state.cache_stats().is_some();

    // Offline-only service still answers, but with template content.
    health.status = if health.providers.iter().any(|p| p.name != "offline") {
        "healthy".to_string()
    } else {
        "degraded".to_string()
    };

    Json(CommandResponse::ok(health))
}

/// Get response cache counters
pub async fn get_cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    match state.cache_stats() {
        Some(stats) => (StatusCode::OK, Json(CommandResponse::ok(stats))),
        None => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::<CacheStats>::err("response cache is disabled")),
        ),
    }
}

/// Remove every cached result
pub async fn clear_cache(State(state): State<AppState>) -> impl IntoResponse {
    match state.clear_cache() {
        Some(cleared) => (
            StatusCode::OK,
            Json(CommandResponse::ok(CacheClearResponse {
                cleared,
                message: "response cache cleared".to_string(),
            })),
        ),
        None => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::<CacheClearResponse>::err(
                "response cache is disabled",
            )),
        ),
    }
}

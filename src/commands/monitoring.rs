//! Monitoring Commands
//!
//! Run metrics and per-request progress polling.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};

use crate::models::response::CommandResponse;
use crate::services::analysis::{MetricsSummary, ProgressSnapshot};
use crate::state::AppState;

/// Call counts, error rate and response times of finished analyses
pub async fn get_metrics_summary(
    State(state): State<AppState>,
) -> Json<CommandResponse<MetricsSummary>> {
    Json(CommandResponse::ok(
        state.orchestrator().metrics().summary().await,
    ))
}

/// Reset all run metrics
pub async fn reset_metrics(State(state): State<AppState>) -> Json<CommandResponse<bool>> {
    state.orchestrator().metrics().reset().await;
    tracing::info!("run metrics reset");
    Json(CommandResponse::ok(true))
}

/// Latest progress snapshot of one request
pub async fn get_progress(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> impl IntoResponse {
    match state.orchestrator().progress().get(&task_id) {
        Some(snapshot) => (StatusCode::OK, Json(CommandResponse::ok(snapshot))),
        None => (
            StatusCode::NOT_FOUND,
            Json(CommandResponse::<ProgressSnapshot>::err(format!(
                "no progress recorded for task {}",
                task_id
            ))),
        ),
    }
}

//! Analysis Commands
//!
//! HTTP handlers that start analyses, either as an NDJSON event stream or as
//! a single JSON response. The one-shot endpoint also accepts its fields as
//! query parameters on GET.

use std::convert::Infallible;

use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures_util::StreamExt;
use serde::Deserialize;

use market_lens_core::{AnalysisType, DateRange};
use market_lens_llm::ProviderType;

use crate::models::analysis::AnalysisRequest;
use crate::models::analysis_result::NormalizedResult;
use crate::models::response::CommandResponse;
use crate::models::stream_event::ErrorKind;
use crate::services::analysis::RunOptions;
use crate::state::AppState;
use crate::utils::error::{AppError, AppResult};

const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Request fields shared by the analysis endpoints
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalyzeRequestBody {
    pub target_keyword: String,
    /// `keyword`, `audience` or `comprehensive`; defaults to keyword
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub additional_context: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    /// Provider to try first (`gemini`, `openai`, `offline`)
    #[serde(default)]
    pub provider_preference: Option<String>,
    /// Older clients send `use_gemini: false` to prefer OpenAI
    #[serde(default)]
    pub use_gemini: Option<bool>,
    #[serde(default)]
    pub no_cache: bool,
}

impl AnalyzeRequestBody {
    /// Validate the body into a request and its run options
    pub fn into_request(self) -> AppResult<(AnalysisRequest, RunOptions)> {
        let analysis_type = match self.target_type.as_deref().map(str::trim) {
            None | Some("") => AnalysisType::Keyword,
            Some(raw) => raw.parse::<AnalysisType>()?,
        };

        let range = DateRange::parse(self.start_date.as_deref(), self.end_date.as_deref())?;

        let preference = match self.provider_preference.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => {
                Some(raw.parse::<ProviderType>().map_err(AppError::validation)?)
            }
            _ => self.use_gemini.map(|use_gemini| {
                if use_gemini {
                    ProviderType::Gemini
                } else {
                    ProviderType::OpenAI
                }
            }),
        };

        let mut request = AnalysisRequest::new(&self.target_keyword, analysis_type)?
            .with_date_range(range);
        if let Some(context) = self.additional_context {
            request = request.with_context(context);
        }
        if let Some(provider) = preference {
            request = request.with_provider_preference(provider);
        }

        Ok((
            request,
            RunOptions {
                bypass_cache: self.no_cache,
            },
        ))
    }
}

fn bad_request(err: AppError) -> Response {
    tracing::debug!(error = %err, "rejected analysis request");
    (
        StatusCode::BAD_REQUEST,
        Json(CommandResponse::<()>::err(err.to_string())),
    )
        .into_response()
}

/// Stream analysis events as NDJSON
pub async fn analyze_stream(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequestBody>,
) -> Response {
    let (request, options) = match body.into_request() {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(e),
    };

    // Dropping the body (client disconnect) drops the stream and cancels the run.
    let events = state
        .orchestrator()
        .stream(request, options)
        .map(|event| Ok::<_, Infallible>(event.to_ndjson_line()));

    (
        [
            (header::CONTENT_TYPE, NDJSON_CONTENT_TYPE),
            (header::CACHE_CONTROL, "no-cache"),
            (HeaderName::from_static("x-accel-buffering"), "no"),
        ],
        Body::from_stream(events),
    )
        .into_response()
}

/// Run an analysis and return only its result
pub async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeRequestBody>,
) -> Response {
    run_to_completion(&state, body).await
}

/// Same as [`analyze`], with the fields taken from the query string
pub async fn analyze_query(
    State(state): State<AppState>,
    Query(params): Query<AnalyzeRequestBody>,
) -> Response {
    run_to_completion(&state, params).await
}

async fn run_to_completion(state: &AppState, body: AnalyzeRequestBody) -> Response {
    let (request, options) = match body.into_request() {
        Ok(parsed) => parsed,
        Err(e) => return bad_request(e),
    };

    match state.orchestrator().analyze(request, options).await {
        Ok(result) => Json(CommandResponse::ok(result)).into_response(),
        Err(e) => {
            let status = match &e {
                AppError::Analysis {
                    kind: ErrorKind::Timeout,
                    ..
                } => StatusCode::GATEWAY_TIMEOUT,
                AppError::Analysis {
                    kind: ErrorKind::ProviderExhausted,
                    ..
                } => StatusCode::BAD_GATEWAY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            (status, Json(CommandResponse::<NormalizedResult>::err(e.to_string()))).into_response()
        }
    }
}

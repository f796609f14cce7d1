//! Market Lens - Rust Backend Library
//!
//! Streaming LLM market analysis: keyword, audience and comprehensive
//! analyses produced by a chain of providers with retries, fallback, JSON
//! repair and schema normalization. It includes:
//! - HTTP handlers (axum) for the NDJSON stream and the one-shot endpoint
//! - The analysis pipeline services
//! - Configuration loading (TOML + environment)
//! - Data models and utilities

pub mod commands;
pub mod models;
pub mod services;
pub mod state;
pub mod storage;
pub mod utils;

pub use commands::{create_router, run_server};
pub use models::analysis::AnalysisRequest;
pub use models::analysis_result::NormalizedResult;
pub use models::response::*;
pub use models::settings::AppConfig;
pub use models::stream_event::{ErrorKind, StreamEvent};
pub use services::analysis::{AnalysisOrchestrator, AnalysisStream, RunOptions};
pub use state::AppState;
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};

//! Market Lens LLM
//!
//! Provides a unified interface for interacting with the network LLM
//! providers used for market analysis:
//! - Google Gemini (primary)
//! - OpenAI chat completions (secondary)
//! - an offline template provider (last resort)
//!
//! Also includes provider-specific streaming adapters, the HTTP client
//! factory and output token budgeting.

pub mod gemini;
pub mod http_client;
pub mod offline;
pub mod openai;
pub mod provider;
pub mod streaming_adapters;
pub mod types;

#[cfg(test)]
pub(crate) mod stub_server;

// Re-export main types
pub use gemini::GeminiProvider;
pub use http_client::build_http_client;
pub use offline::OfflineProvider;
pub use openai::OpenAIProvider;
pub use provider::{
    context_window, missing_api_key_error, output_token_budget, parse_http_error, LlmProvider,
};
pub use types::*;

// Re-export streaming adapters
pub use streaming_adapters::{GeminiAdapter, OpenAIAdapter};

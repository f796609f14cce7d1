//! HTTP Client Factory
//!
//! Provides a factory function for building reqwest clients shared by the
//! network providers.

use std::time::Duration;

use crate::types::{LlmError, LlmResult};

/// Connection establishment limit. Whole-attempt limits are enforced by the
/// caller so streaming bodies are never cut by the client itself.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Build a `reqwest::Client` for provider calls.
///
/// Proxy settings from the environment are honored by reqwest's defaults.
pub fn build_http_client() -> LlmResult<reqwest::Client> {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .user_agent(concat!("market-lens/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| LlmError::Other {
            message: format!("failed to build HTTP client: {}", e),
        })
}

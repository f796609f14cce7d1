//! Market Lens Core
//!
//! Foundational domain types, error types, and stream events for the Market
//! Lens workspace. This crate has zero dependencies on application-level code
//! (HTTP server, LLM providers, caches).
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `analysis` - Analysis kinds, date windows and prompt bundles
//! - `streaming` - Unified stream event types and adapter trait
//!
//! ## Design Principles
//!
//! 1. **Minimal dependencies** - serde, thiserror and chrono only
//! 2. **Unidirectional dependency** - this crate depends on nothing else in the workspace

pub mod analysis;
pub mod error;
pub mod streaming;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Analysis Types ─────────────────────────────────────────────────────
pub use analysis::{estimate_tokens, AnalysisType, DateRange, PromptBundle, DATE_FORMAT};

// ── Streaming Types ────────────────────────────────────────────────────
pub use streaming::{AdapterError, StreamAdapter, UnifiedStreamEvent};

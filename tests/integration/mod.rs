//! Integration Tests Module
//!
//! End-to-end tests for the analysis pipeline and the HTTP surface. Providers
//! are scripted in-process; no network access is required.

// Orchestrator, fallback chain, cache and cancellation tests
mod pipeline_test;

// HTTP routes and NDJSON framing tests
mod http_test;

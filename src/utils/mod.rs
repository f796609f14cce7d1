//! Utilities
//!
//! Common utilities used throughout the application.

pub mod error;
pub mod paths;
pub mod redact;

pub use error::*;
pub use paths::*;
pub use redact::redact_secrets;

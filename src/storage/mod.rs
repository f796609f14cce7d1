//! Storage Layer
//!
//! Configuration loading from TOML and the environment.

pub mod config;

pub use config::*;

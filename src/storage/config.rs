//! TOML Configuration Management
//!
//! Loads the application configuration from a TOML file, applies
//! environment overrides and validates the result.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::AppConfig;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::default_config_path;

/// Environment variables that override file settings
pub mod env_keys {
    pub const GEMINI_API_KEY: &str = "GEMINI_API_KEY";
    pub const GEMINI_MODEL: &str = "GEMINI_MODEL";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_MODEL: &str = "OPENAI_MODEL";
    pub const HOST: &str = "MARKET_LENS_HOST";
    pub const PORT: &str = "MARKET_LENS_PORT";
    pub const LOG: &str = "MARKET_LENS_LOG";
}

/// Configuration service for loading app settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: Option<PathBuf>,
    config: AppConfig,
}

impl ConfigService {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file is not an error: defaults are used. Process environment
    /// overrides are applied before validation.
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        let config_path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().ok(),
        };

        let mut config = match config_path.as_deref() {
            Some(p) if p.exists() => Self::load_from_file(p)?,
            Some(p) if path.is_some() => {
                return Err(AppError::config(format!(
                    "config file not found: {}",
                    p.display()
                )))
            }
            _ => AppConfig::default(),
        };

        apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
        config.validate().map_err(AppError::config)?;

        tracing::debug!(
            path = ?config_path,
            providers = ?config.available_providers(),
            "configuration loaded"
        );

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> AppResult<AppConfig> {
        let config: AppConfig = toml::from_str(content)?;
        Ok(config)
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Consume the service, keeping the configuration
    pub fn into_config(self) -> AppConfig {
        self.config
    }

    /// Path the configuration was looked up at, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }
}

impl Default for ConfigService {
    fn default() -> Self {
        Self {
            config_path: None,
            config: AppConfig::default(),
        }
    }
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Blank values are ignored. An unparsable port is a configuration error.
pub fn apply_env_overrides<F>(config: &mut AppConfig, lookup: F) -> AppResult<()>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(key) = get(env_keys::GEMINI_API_KEY) {
        config.providers.gemini.api_key = Some(key);
    }
    if let Some(model) = get(env_keys::GEMINI_MODEL) {
        config.providers.gemini.model = Some(model);
    }
    if let Some(key) = get(env_keys::OPENAI_API_KEY) {
        config.providers.openai.api_key = Some(key);
    }
    if let Some(model) = get(env_keys::OPENAI_MODEL) {
        config.providers.openai.model = Some(model);
    }
    if let Some(host) = get(env_keys::HOST) {
        config.server.host = host;
    }
    if let Some(port) = get(env_keys::PORT) {
        config.server.port = port.parse().map_err(|e| {
            AppError::config(format!("invalid {} '{}': {}", env_keys::PORT, port, e))
        })?;
    }
    if let Some(level) = get(env_keys::LOG) {
        config.log_level = level;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use market_lens_llm::ProviderType;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ConfigService::from_toml_str(
            r#"
            log_level = "debug"

            [server]
            port = 9000

            [retry]
            max_retries = 3

            [providers]
            priority = ["openai", "gemini"]

            [cache]
            keyword_ttl_secs = 600
            "#,
        )
        .unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(
            config.providers.priority,
            vec![ProviderType::OpenAI, ProviderType::Gemini]
        );
        assert_eq!(config.cache.keyword_ttl_secs, 600);
        assert_eq!(config.cache.audience_ttl_secs, 7_200);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let err = ConfigService::from_toml_str("[server\nport = ").unwrap_err();
        assert!(matches!(err, AppError::TomlParse(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("GEMINI_API_KEY", "  AIzaSyTestKey0123456789abcd  "),
                ("OPENAI_MODEL", "gpt-4o"),
                ("MARKET_LENS_PORT", "8080"),
                ("MARKET_LENS_LOG", "warn"),
                ("OPENAI_API_KEY", "   "),
            ]),
        )
        .unwrap();

        assert_eq!(
            config.providers.gemini.api_key.as_deref(),
            Some("AIzaSyTestKey0123456789abcd")
        );
        assert_eq!(config.providers.openai.model.as_deref(), Some("gpt-4o"));
        assert!(config.providers.openai.api_key.is_none());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.available_providers(), vec![ProviderType::Gemini]);
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, lookup(&[("MARKET_LENS_PORT", "eighty")]))
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_load_from_explicit_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nattempt_secs = 30\nrequest_secs = 90").unwrap();

        let service = ConfigService::load(Some(file.path())).unwrap();
        assert_eq!(service.get_config().timeouts.attempt_secs, 30);
        assert_eq!(service.config_path(), Some(file.path()));
    }

    #[test]
    fn test_load_rejects_invalid_timeouts() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[timeouts]\nattempt_secs = 120\nrequest_secs = 60").unwrap();
        let err = ConfigService::load(Some(file.path())).unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.toml");
        assert!(ConfigService::load(Some(&missing)).is_err());
    }
}

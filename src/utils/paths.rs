//! Cross-Platform Path Utilities
//!
//! Resolves where Market Lens looks for its configuration file.

use std::path::PathBuf;

use crate::utils::error::{AppError, AppResult};

/// Application directory name under the platform config dir
pub const APP_DIR_NAME: &str = "market-lens";

/// Default configuration file name
pub const CONFIG_FILE_NAME: &str = "market-lens.toml";

/// Get the platform configuration directory (e.g. ~/.config on Linux)
pub fn config_root() -> AppResult<PathBuf> {
    dirs::config_dir().ok_or_else(|| AppError::config("Could not determine config directory"))
}

/// Get the Market Lens config directory (<config>/market-lens/)
pub fn app_config_dir() -> AppResult<PathBuf> {
    Ok(config_root()?.join(APP_DIR_NAME))
}

/// Get the default config file path (<config>/market-lens/market-lens.toml)
pub fn default_config_path() -> AppResult<PathBuf> {
    Ok(app_config_dir()?.join(CONFIG_FILE_NAME))
}

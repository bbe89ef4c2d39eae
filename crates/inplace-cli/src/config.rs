//! Configuration file support for the inplace CLI.
//!
//! Configuration is read from `~/.config/inplace/config.toml` on Linux or
//! `~/Library/Application Support/com.inplace.inplace/config.toml` on macOS.
//! Setting `INPLACE_CONFIG_DIR` moves both the configuration file and the
//! default bookmark store into that directory.
//!
//! # Example configuration
//!
//! ```toml
//! [coordination]
//! quiescence = "2s"
//! lock_timeout = "10s"
//!
//! [store]
//! path = "/home/user/.local/share/inplace/defaults.json"
//! app_name = "inplace"
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use inplace_core::CoordinationConfig;
use serde::{Deserialize, Serialize};

/// Overrides the configuration and data directories.
pub const CONFIG_DIR_ENV: &str = "INPLACE_CONFIG_DIR";

const CONFIG_FILE: &str = "config.toml";
const STORE_FILE: &str = "defaults.json";
const DEFAULT_APP_NAME: &str = "inplace";

/// Main configuration structure
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct Config {
    /// Autosave, locking and change delivery timings
    #[serde(default)]
    pub coordination: CoordinationConfig,

    /// Where bookmarks and granted roots are persisted
    #[serde(default)]
    pub store: StoreConfig,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct StoreConfig {
    /// Defaults file holding the bookmark slots
    pub path: Option<PathBuf>,

    /// Name sent as `x-source` in deep link replies
    pub app_name: Option<String>,
}

impl Config {
    /// Load configuration from `path`, or from the default location.
    ///
    /// A missing file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => config_dir()?.join(CONFIG_FILE),
        };

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// The defaults file, falling back to the platform data directory.
    pub fn store_path(&self) -> Result<PathBuf> {
        match &self.store.path {
            Some(path) => Ok(path.clone()),
            None => Ok(data_dir()?.join(STORE_FILE)),
        }
    }

    pub fn app_name(&self) -> &str {
        self.store.app_name.as_deref().unwrap_or(DEFAULT_APP_NAME)
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "inplace", "inplace")
        .ok_or_else(|| anyhow::anyhow!("Could not determine home directory"))
}

/// Directory holding `config.toml`.
pub fn config_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    Ok(project_dirs()?.config_dir().to_path_buf())
}

/// Directory holding the default bookmark store.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    Ok(project_dirs()?.data_dir().to_path_buf())
}

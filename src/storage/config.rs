//! TOML Configuration Management
//!
//! Reads and writes `~/.wiki-lens/config.toml`. Secrets may instead come
//! from the environment, which overrides the file without being written back.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use wiki_lens_core::ProxyConfig;

use crate::models::settings::{AppConfig, SettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_dir};

/// Analysis API key override
pub const ENV_API_KEY: &str = "WIKI_LENS_API_KEY";
/// Backend user token override
pub const ENV_ACCESS_TOKEN: &str = "WIKI_LENS_ACCESS_TOKEN";
/// Backend base URL override
pub const ENV_BACKEND_URL: &str = "WIKI_LENS_BACKEND_URL";
/// Outbound proxy, `scheme://[user[:pass]@]host:port`
pub const ENV_PROXY: &str = "WIKI_LENS_PROXY";

/// Configuration service for managing app settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: AppConfig,
}

impl ConfigService {
    /// Open the config at the default location, creating it with defaults
    /// when missing.
    pub fn new() -> AppResult<Self> {
        Self::open(config_path()?)
    }

    /// Open the config at `path`, creating it with defaults when missing.
    pub fn open(path: PathBuf) -> AppResult<Self> {
        let config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            let config = AppConfig::default();
            Self::save_to_file(&path, &config)?;
            info!(path = %path.display(), "created default config");
            config
        };
        Ok(Self {
            config_path: path,
            config,
        })
    }

    /// Load the config at `path` if it exists, defaults otherwise. Nothing
    /// is written.
    pub fn load_or_default(path: &Path) -> AppResult<AppConfig> {
        if path.exists() {
            Self::load_from_file(path)
        } else {
            debug!(path = %path.display(), "no config file, using defaults");
            Ok(AppConfig::default())
        }
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> AppResult<AppConfig> {
        let content = fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate().map_err(AppError::validation)?;
        Ok(config)
    }

    /// Save configuration to a file
    pub fn save_to_file(path: &Path, config: &AppConfig) -> AppResult<()> {
        config.validate().map_err(AppError::validation)?;
        if let Some(dir) = path.parent() {
            ensure_dir(dir)?;
        }
        let content = toml::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.config_path
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    /// Check the stored configuration
    pub fn validate(&self) -> AppResult<()> {
        self.config.validate().map_err(AppError::validation)
    }

    /// Apply a partial update and persist it. An update that would make the
    /// config invalid is rejected and nothing changes.
    pub fn update(&mut self, update: SettingsUpdate) -> AppResult<AppConfig> {
        let mut next = self.config.clone();
        next.apply_update(update);
        Self::save_to_file(&self.config_path, &next)?;
        self.config = next;
        Ok(self.config.clone())
    }

    /// Save the current configuration to disk
    pub fn save(&self) -> AppResult<()> {
        Self::save_to_file(&self.config_path, &self.config)
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = AppConfig::default();
        self.save()
    }
}

/// Overlay non-empty environment values onto `config`. An unparsable proxy
/// is ignored with a warning.
pub fn apply_env_overrides(config: &mut AppConfig, lookup: impl Fn(&str) -> Option<String>) {
    let value = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
    if let Some(key) = value(ENV_API_KEY) {
        config.llm.api_key = key;
    }
    if let Some(token) = value(ENV_ACCESS_TOKEN) {
        config.access_token = token;
    }
    if let Some(url) = value(ENV_BACKEND_URL) {
        config.backend_url = url;
    }
    if let Some(raw) = value(ENV_PROXY) {
        match ProxyConfig::parse(&raw) {
            Ok(proxy) => config.proxy = Some(proxy),
            Err(err) => warn!(error = %err, "ignoring {}", ENV_PROXY),
        }
    }
}

//! Application configuration management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::models::DownloadMode;
use crate::utils::validation::is_http_url;

pub const MIN_POLLING_INTERVAL_MINUTES: u32 = 1;
pub const MAX_POLLING_INTERVAL_MINUTES: u32 = 1440;
pub const DEFAULT_API_BASE_URL: &str = "https://api.adventistyouth.it";

/// User configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    /// Local folder where files are saved
    pub work_directory: Option<PathBuf>,
    pub polling_enabled: bool,
    /// 1..=1440
    pub polling_interval_minutes: u32,
    /// `None` keeps files forever, `Some(0)` purges right after completion
    pub retention_days: Option<u32>,
    /// Categories downloaded automatically when first discovered
    pub auto_download_categories: BTreeSet<String>,
    pub download_mode: DownloadMode,
    pub prefer_optimized: bool,
    pub api_base_url: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            work_directory: None,
            polling_enabled: true,
            polling_interval_minutes: 60,
            retention_days: Some(7),
            auto_download_categories: BTreeSet::new(),
            download_mode: DownloadMode::Queue,
            prefer_optimized: false,
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("polling interval must be between 1 and 1440 minutes, got {0}")]
    InvalidPollingInterval(u32),

    #[error("work directory does not exist or is not a directory: {0}")]
    InvalidWorkDirectory(String),

    #[error("invalid API base URL: {0}")]
    InvalidApiUrl(String),
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        validate_polling_interval(self.polling_interval_minutes)?;
        if !is_http_url(&self.api_base_url) {
            return Err(ConfigValidationError::InvalidApiUrl(
                self.api_base_url.clone(),
            ));
        }
        Ok(())
    }

    /// Load configuration from file, creating it with defaults when missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;

            let config: AppConfig =
                serde_json::from_str(&content).with_context(|| "Failed to parse config file")?;

            tracing::info!("Loaded configuration from: {:?}", path);
            Ok(config)
        } else {
            let config = Self::default();
            config.save_to(path)?;
            tracing::info!("Created default configuration at: {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content =
            serde_json::to_string_pretty(self).with_context(|| "Failed to serialize config")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        tracing::debug!("Saved configuration to: {:?}", path);
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("it", "adventistyouth", "resource-sync")
            .with_context(|| "Failed to get project directories")?;

        Ok(project_dirs.config_dir().join("config.json"))
    }
}

pub fn validate_polling_interval(minutes: u32) -> Result<(), ConfigValidationError> {
    if !(MIN_POLLING_INTERVAL_MINUTES..=MAX_POLLING_INTERVAL_MINUTES).contains(&minutes) {
        return Err(ConfigValidationError::InvalidPollingInterval(minutes));
    }
    Ok(())
}

pub fn validate_work_directory(path: &Path) -> Result<(), ConfigValidationError> {
    if !path.is_dir() {
        return Err(ConfigValidationError::InvalidWorkDirectory(
            path.display().to_string(),
        ));
    }
    Ok(())
}

/// An accepted configuration change
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChange {
    pub previous: AppConfig,
    pub current: AppConfig,
}

/// Live configuration shared by every component.
///
/// Changes are validated before they become visible and are written to disk
/// afterwards; a rejected change leaves both memory and disk untouched.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    inner: Arc<RwLock<AppConfig>>,
    path: Option<PathBuf>,
}

impl ConfigStore {
    pub fn new(config: AppConfig, path: Option<PathBuf>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
            path,
        }
    }

    /// In-memory store, never persisted.
    pub fn in_memory(config: AppConfig) -> Self {
        Self::new(config, None)
    }

    /// Load from `path`, falling back to defaults when the file is unreadable or invalid.
    pub fn load_or_default(path: PathBuf) -> Self {
        let config = match AppConfig::load_from(&path) {
            Ok(cfg) => match cfg.validate() {
                Ok(()) => cfg,
                Err(err) => {
                    tracing::warn!(
                        "Invalid configuration detected ({}), falling back to defaults",
                        err
                    );
                    AppConfig::default()
                }
            },
            Err(err) => {
                tracing::warn!(
                    "Failed to load configuration from disk: {:#}. Using defaults",
                    err
                );
                AppConfig::default()
            }
        };
        Self::new(config, Some(path))
    }

    pub fn snapshot(&self) -> AppConfig {
        self.inner.read().clone()
    }

    pub fn read<R>(&self, f: impl FnOnce(&AppConfig) -> R) -> R {
        f(&self.inner.read())
    }

    /// Apply `change` to a copy, validate it, then publish and persist it.
    ///
    /// The returned pair is taken under the same write lock, so concurrent
    /// updates each see the value they actually replaced.
    pub fn update(
        &self,
        change: impl FnOnce(&mut AppConfig),
    ) -> Result<ConfigChange, ConfigValidationError> {
        let applied = {
            let mut guard = self.inner.write();
            let mut candidate = guard.clone();
            change(&mut candidate);
            candidate.validate()?;
            let previous = std::mem::replace(&mut *guard, candidate.clone());
            ConfigChange {
                previous,
                current: candidate,
            }
        };
        self.persist(&applied.current);
        Ok(applied)
    }

    pub fn replace(&self, config: AppConfig) -> Result<ConfigChange, ConfigValidationError> {
        self.update(move |current| *current = config)
    }

    fn persist(&self, config: &AppConfig) {
        if let Some(path) = &self.path {
            if let Err(err) = config.save_to(path) {
                tracing::warn!("Failed to persist configuration: {:#}", err);
            }
        }
    }
}

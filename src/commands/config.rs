//! Configuration command handlers
//!
//! Every setter validates first; a rejected value leaves both the live
//! configuration and the file on disk unchanged. Side effects (timer restart,
//! admission, retention sweep) run only after the change is accepted.

use std::path::PathBuf;
use tracing::{error, info};

use crate::core::config::{
    validate_polling_interval, validate_work_directory, AppConfig, ConfigChange,
};
use crate::core::models::{AppError, AppResult, DownloadMode};
use crate::AppState;

/// Source of a user-chosen directory, e.g. a native folder dialog.
pub trait DirectoryPicker {
    fn pick_directory(&self) -> Option<PathBuf>;
}

impl<F> DirectoryPicker for F
where
    F: Fn() -> Option<PathBuf>,
{
    fn pick_directory(&self) -> Option<PathBuf> {
        self()
    }
}

/// Get current application configuration
pub fn get_config(state: &AppState) -> AppConfig {
    state.config.snapshot()
}

/// Replace the whole configuration
pub async fn set_config(state: &AppState, new_config: AppConfig) -> AppResult<()> {
    info!("🔧 Updating application configuration");

    match set_config_impl(state, new_config).await {
        Ok(()) => {
            info!("✅ Configuration updated successfully");
            Ok(())
        }
        Err(e) => {
            error!("❌ Failed to update configuration: {}", e);
            Err(e)
        }
    }
}

async fn set_config_impl(state: &AppState, new_config: AppConfig) -> AppResult<()> {
    if let Some(dir) = &new_config.work_directory {
        validate_work_directory(dir)?;
    }
    let change = state.config.replace(new_config)?;
    apply_effects(state, &change).await
}

/// React to an accepted configuration change.
async fn apply_effects(state: &AppState, change: &ConfigChange) -> AppResult<()> {
    let ConfigChange { previous, current } = change;
    if previous.polling_enabled != current.polling_enabled {
        if current.polling_enabled {
            state.poller.start_polling();
        } else {
            state.poller.stop_polling();
        }
    } else if previous.polling_interval_minutes != current.polling_interval_minutes {
        state.poller.restart_polling();
    }

    if previous.download_mode != current.download_mode
        || previous.work_directory != current.work_directory
    {
        state.scheduler.reschedule().await?;
    }

    if previous.retention_days != current.retention_days {
        state.retention.sweep().await?;
    }
    Ok(())
}

/// Set the work directory. The directory must already exist.
pub async fn set_work_directory(state: &AppState, path: String) -> AppResult<()> {
    info!("📁 Setting work directory: {}", path);
    let dir = PathBuf::from(path);
    validate_work_directory(&dir)?;

    let change = state.config.update(|c| c.work_directory = Some(dir))?;
    apply_effects(state, &change).await?;

    if let Err(err) = state.poller.load_cache().await {
        tracing::warn!("Ignoring unreadable resource cache: {}", err);
    }
    Ok(())
}

/// Let the user pick the work directory. Returns `None` when the picker was dismissed.
pub async fn select_work_directory(
    state: &AppState,
    picker: &impl DirectoryPicker,
) -> AppResult<Option<String>> {
    let Some(dir) = picker.pick_directory() else {
        info!("Work directory selection cancelled");
        return Ok(None);
    };
    let path = dir.to_string_lossy().to_string();
    set_work_directory(state, path.clone()).await?;
    Ok(Some(path))
}

pub async fn set_polling_enabled(state: &AppState, enabled: bool) -> AppResult<()> {
    info!("⏱️ Polling enabled: {}", enabled);
    let change = state.config.update(|c| c.polling_enabled = enabled)?;
    apply_effects(state, &change).await
}

/// Set the polling interval in minutes, 1..=1440.
pub async fn set_polling_interval(state: &AppState, minutes: u32) -> AppResult<()> {
    validate_polling_interval(minutes)?;
    info!("⏱️ Polling interval: {} minutes", minutes);
    let change = state
        .config
        .update(|c| c.polling_interval_minutes = minutes)?;
    apply_effects(state, &change).await
}

/// `None` keeps files forever, `Some(0)` deletes them right after completion.
pub async fn set_retention_days(state: &AppState, days: Option<u32>) -> AppResult<()> {
    info!("🧹 Retention days: {:?}", days);
    let change = state.config.update(|c| c.retention_days = days)?;
    apply_effects(state, &change).await
}

/// Switching to a wider mode admits waiting jobs at once; narrowing lets
/// running transfers finish.
pub async fn set_download_mode(state: &AppState, mode: DownloadMode) -> AppResult<()> {
    info!("🔀 Download mode: {:?}", mode);
    let change = state.config.update(|c| c.download_mode = mode)?;
    apply_effects(state, &change).await
}

/// Enable or disable auto-download for one category. Only future discoveries are affected.
pub fn set_auto_download_category(
    state: &AppState,
    category: String,
    enabled: bool,
) -> AppResult<()> {
    let category = category.trim().to_string();
    if category.is_empty() {
        return Err(AppError::Parse("category must not be empty".into()));
    }
    info!("🤖 Auto-download for '{}': {}", category, enabled);
    state.config.update(|c| {
        if enabled {
            c.auto_download_categories.insert(category);
        } else {
            c.auto_download_categories.remove(&category);
        }
    })?;
    Ok(())
}

pub fn set_prefer_optimized(state: &AppState, prefer: bool) -> AppResult<()> {
    state.config.update(|c| c.prefer_optimized = prefer)?;
    Ok(())
}

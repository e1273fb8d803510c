//! Resource list, status and file system queries

use tracing::{error, info};

use crate::core::layout::DownloadLayout;
use crate::core::models::{
    AppError, AppResult, AppStatus, Resource, ResourceListResponse, ResourceSummary,
    WeekIdentifier,
};
use crate::core::summary::compute_summary;
use crate::utils::validation::validate_url;
use crate::AppState;

fn layout(state: &AppState) -> Option<DownloadLayout> {
    state
        .config
        .read(|c| c.work_directory.clone())
        .map(DownloadLayout::new)
}

/// Resources of the latest known manifest
pub fn get_resources(state: &AppState) -> Vec<Resource> {
    state.poller.resources().as_ref().clone()
}

/// Trigger an immediate poll. Joins a poll that is already running.
pub async fn force_poll(state: &AppState) -> AppResult<ResourceListResponse> {
    info!("🔄 Manual poll requested");
    state.poller.poll_now().await.map_err(|e| {
        error!("❌ Manual poll failed ({:?}): {}", e.category(), e);
        e
    })
}

pub fn get_status(state: &AppState) -> AppStatus {
    state.poller.status()
}

/// Week directories other than the current week, newest first
pub fn get_archived_weeks(state: &AppState) -> AppResult<Vec<WeekIdentifier>> {
    let Some(layout) = layout(state) else {
        return Ok(Vec::new());
    };
    let current = state
        .poller
        .status()
        .current_week
        .unwrap_or_else(WeekIdentifier::current);
    Ok(layout.archived_weeks(current)?)
}

pub fn get_resource_summary(state: &AppState) -> ResourceSummary {
    compute_summary(
        &state.poller.resources(),
        &state.scheduler.jobs(),
        layout(state).as_ref(),
    )
}

/// Whether the resource's file is already in the work directory
pub fn check_resource_status(state: &AppState, resource: Resource) -> bool {
    layout(state)
        .and_then(|l| l.existing_file(&resource))
        .is_some()
}

/// Remote size in bytes, 0 when the server does not report one.
pub async fn get_file_size(state: &AppState, url: String) -> AppResult<u64> {
    validate_url(&url).map_err(|e| AppError::Parse(e.to_string()))?;
    let size = state.transfer.content_length(&url).await?;
    Ok(size.unwrap_or(0))
}

//! Download management commands

use tokio::sync::broadcast;
use tracing::{error, info};

use crate::core::events::DownloadEvent;
use crate::core::models::{AppResult, DownloadJob, Resource, ResourceId};
use crate::core::scheduler::StartOutcome;
use crate::AppState;

/// Queue a resource. Starting one that is already queued or running is a no-op.
pub async fn download_resource(state: &AppState, resource: Resource) -> AppResult<StartOutcome> {
    info!("📥 Download requested for resource {} ({})", resource.id, resource.title);
    state.scheduler.start(resource).await
}

pub async fn pause_download(state: &AppState, id: ResourceId) -> AppResult<()> {
    info!("⏸️ Pause requested for resource {}", id);
    state.scheduler.pause(id).await.map_err(|e| {
        error!("❌ Failed to pause resource {} ({:?}): {}", id, e.category(), e);
        e
    })
}

/// Stop the download, delete its partial file and forget the job.
pub async fn cancel_download(state: &AppState, id: ResourceId) -> AppResult<()> {
    info!("🛑 Cancel requested for resource {}", id);
    state.scheduler.cancel(id).await.map_err(|e| {
        error!("❌ Failed to cancel resource {} ({:?}): {}", id, e.category(), e);
        e
    })
}

/// All known jobs in arrival order
pub fn get_downloads(state: &AppState) -> Vec<DownloadJob> {
    state.scheduler.jobs().as_ref().clone()
}

pub fn subscribe(state: &AppState) -> broadcast::Receiver<DownloadEvent> {
    state.events.subscribe()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::{AppError, JobStatus};
    use crate::core::test_support::{resource, test_state, wait_until};

    #[tokio::test]
    async fn test_download_lifecycle_through_commands() {
        let (state, transfer, _source, _dir) = test_state();
        let mut events = subscribe(&state);
        transfer.add("https://cdn.test/a.pdf", b"weekly bulletin".to_vec());
        let r = resource(1, "bulletin", "https://cdn.test/a.pdf");

        assert_eq!(
            download_resource(&state, r.clone()).await.unwrap(),
            StartOutcome::Queued
        );
        wait_until(|| {
            get_downloads(&state)
                .first()
                .map(|j| j.status == JobStatus::Completed)
                .unwrap_or(false)
        })
        .await;

        let mut names = Vec::new();
        while let Ok(event) = events.try_recv() {
            names.push(event.name());
        }
        assert!(names.contains(&"download-started"));
        assert!(names.contains(&"download-complete"));

        assert_eq!(
            download_resource(&state, r).await.unwrap(),
            StartOutcome::Restarted
        );
    }

    #[tokio::test]
    async fn test_pause_and_cancel_unknown_job() {
        let (state, _transfer, _source, _dir) = test_state();
        assert!(matches!(
            pause_download(&state, 42).await,
            Err(AppError::JobNotFound(42))
        ));
        assert!(matches!(
            cancel_download(&state, 42).await,
            Err(AppError::JobNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_cancel_completed_job_is_rejected() {
        let (state, transfer, _source, _dir) = test_state();
        transfer.add("https://cdn.test/a.pdf", b"x".to_vec());
        download_resource(&state, resource(1, "bulletin", "https://cdn.test/a.pdf"))
            .await
            .unwrap();
        wait_until(|| state.scheduler.job(1).map(|j| j.status) == Some(JobStatus::Completed))
            .await;

        let err = cancel_download(&state, 1).await.unwrap_err();
        assert!(matches!(err, AppError::InvalidState { .. }));
        assert_eq!(
            serde_json::to_value(&err).unwrap(),
            serde_json::json!("Cannot cancel resource 1 while Completed")
        );
    }
}

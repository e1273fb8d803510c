//! Resource summary projection
//!
//! Counters derived from the resource list and the job snapshot. The projector
//! task only reads published snapshots, so a burst of job updates never waits
//! on it; it recomputes once the burst settles and emits `summary-updated`
//! when the numbers actually changed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::core::config::ConfigStore;
use crate::core::events::{DownloadEvent, EventBus};
use crate::core::layout::DownloadLayout;
use crate::core::models::{DownloadJob, JobStatus, Resource, ResourceId, ResourceSummary};

pub const SUMMARY_DEBOUNCE: Duration = Duration::from_millis(200);

/// `downloaded` counts completed jobs, plus files found on disk for resources without a job.
pub fn compute_summary(
    resources: &[Resource],
    jobs: &[DownloadJob],
    layout: Option<&DownloadLayout>,
) -> ResourceSummary {
    let by_id: HashMap<ResourceId, &DownloadJob> =
        jobs.iter().map(|job| (job.resource_id, job)).collect();

    let downloaded = resources
        .iter()
        .filter(|resource| match by_id.get(&resource.id) {
            Some(job) => job.status == JobStatus::Completed,
            None => layout
                .map(|l| l.existing_file(resource).is_some())
                .unwrap_or(false),
        })
        .count();

    ResourceSummary {
        total: resources.len(),
        downloaded,
        active: jobs
            .iter()
            .filter(|j| j.status == JobStatus::Downloading)
            .count(),
        queued: jobs.iter().filter(|j| j.status == JobStatus::Pending).count(),
    }
}

pub struct SummaryProjector {
    resources: watch::Receiver<Arc<Vec<Resource>>>,
    jobs: watch::Receiver<Arc<Vec<DownloadJob>>>,
    config: ConfigStore,
    events: EventBus,
    debounce: Duration,
}

impl SummaryProjector {
    pub fn new(
        resources: watch::Receiver<Arc<Vec<Resource>>>,
        jobs: watch::Receiver<Arc<Vec<DownloadJob>>>,
        config: ConfigStore,
        events: EventBus,
    ) -> Self {
        Self {
            resources,
            jobs,
            config,
            events,
            debounce: SUMMARY_DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn spawn(mut self) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut last: Option<ResourceSummary> = None;
            loop {
                let changed = tokio::select! {
                    r = self.resources.changed() => r,
                    r = self.jobs.changed() => r,
                };
                if changed.is_err() {
                    debug!("Summary sources closed, stopping projector");
                    break;
                }

                tokio::time::sleep(self.debounce).await;
                let resources = self.resources.borrow_and_update().clone();
                let jobs = self.jobs.borrow_and_update().clone();
                let layout = self
                    .config
                    .read(|c| c.work_directory.clone())
                    .map(DownloadLayout::new);

                let summary = match tokio::task::spawn_blocking(move || {
                    compute_summary(&resources, &jobs, layout.as_ref())
                })
                .await
                {
                    Ok(summary) => summary,
                    Err(_) => continue,
                };

                if last != Some(summary) {
                    last = Some(summary);
                    self.events.emit(DownloadEvent::SummaryUpdated { summary });
                }
            }
        })
    }
}

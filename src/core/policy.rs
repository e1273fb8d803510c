//! Auto-download policy
//!
//! Newly discovered resources whose category is enabled are started through the
//! same scheduler path as a manual download. Changing the category set only
//! affects later discoveries. Corrections of files already on disk are fetched
//! again whatever the category set says.

use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::core::config::ConfigStore;
use crate::core::errata::{detect_errata, local_files, supersede};
use crate::core::layout::DownloadLayout;
use crate::core::models::{Resource, ResourceId};
use crate::core::scheduler::{SchedulerHandle, StartOutcome};

/// An outdated local copy that was moved aside
#[derive(Debug, Clone, PartialEq)]
pub struct Superseded {
    pub id: ResourceId,
    pub archived_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct AutoDownloadPolicy {
    config: ConfigStore,
    scheduler: SchedulerHandle,
}

impl AutoDownloadPolicy {
    pub fn new(config: ConfigStore, scheduler: SchedulerHandle) -> Self {
        Self { config, scheduler }
    }

    pub fn allows(&self, resource: &Resource) -> bool {
        self.config.read(|c| {
            c.auto_download_categories
                .iter()
                .any(|category| category.eq_ignore_ascii_case(resource.category.trim()))
        })
    }

    /// Start every allowed resource that is not on disk yet. Returns how many were queued.
    pub async fn on_discovered(&self, resources: &[Resource]) -> usize {
        let layout = self
            .config
            .read(|c| c.work_directory.clone())
            .map(DownloadLayout::new);

        let mut started = 0;
        for resource in resources.iter().filter(|r| self.allows(r)) {
            if let Some(existing) = layout.as_ref().and_then(|l| l.existing_file(resource)) {
                debug!("Resource {} already on disk at {:?}", resource.id, existing);
                continue;
            }
            match self.scheduler.start(resource.clone()).await {
                Ok(StartOutcome::AlreadyQueued | StartOutcome::AlreadyDownloading) => {}
                Ok(outcome) => {
                    debug!("Auto-download of resource {}: {:?}", resource.id, outcome);
                    started += 1;
                }
                Err(err) => warn!("Auto-download of resource {} rejected: {}", resource.id, err),
            }
        }

        if started > 0 {
            info!("🤖 Auto-download queued {} new resources", started);
        }
        started
    }

    /// Archive local copies that `resources` correct and queue the corrected files.
    pub async fn on_errata(&self, resources: &[Resource]) -> Vec<Superseded> {
        let Some(layout) = self
            .config
            .read(|c| c.work_directory.clone())
            .map(DownloadLayout::new)
        else {
            return Vec::new();
        };

        let jobs = self.scheduler.jobs();
        let local = local_files(&layout, resources, &jobs);
        let mut superseded = Vec::new();
        for change in detect_errata(&local, resources) {
            let id = change.resource.id;
            let archived_path = match supersede(&layout, &change.old_file).await {
                Ok(path) => path,
                Err(err) => {
                    warn!("Failed to archive outdated copy of resource {}: {}", id, err);
                    continue;
                }
            };
            info!(
                "📝 Resource {} was corrected on {}, previous copy moved to {:?}",
                id, change.resource.created_at, archived_path
            );
            if let Err(err) = self.scheduler.start(change.resource).await {
                warn!("Re-download of corrected resource {} rejected: {}", id, err);
            }
            superseded.push(Superseded { id, archived_path });
        }
        superseded
    }
}

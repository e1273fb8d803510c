//! Retention sweeper
//!
//! `retention_days = None` keeps everything. `Some(0)` deletes a file as soon as
//! its download completes. `Some(n)` deletes completed files older than `n`
//! days on a periodic sweep. Partial files and files of jobs that are not
//! completed are never touched.

use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::core::config::ConfigStore;
use crate::core::events::{DownloadEvent, EventBus};
use crate::core::layout::{parse_week_dir_name, ARCHIVE_DIR};
use crate::core::models::{AppError, AppResult, JobStatus, ResourceId};
use crate::core::scheduler::SchedulerHandle;
use crate::utils::file_utils::{is_partial_file, remove_file_if_exists};

pub const RETENTION_SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Clone)]
pub struct RetentionSweeper {
    config: ConfigStore,
    scheduler: SchedulerHandle,
    events: EventBus,
}

impl RetentionSweeper {
    pub fn new(config: ConfigStore, scheduler: SchedulerHandle, events: EventBus) -> Self {
        Self {
            config,
            scheduler,
            events,
        }
    }

    /// Run until the event bus closes: purge on completion when retention is
    /// zero and sweep every `every`.
    pub fn spawn(self, every: Duration) -> JoinHandle<()> {
        let mut events = self.events.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(DownloadEvent::DownloadComplete { id }) => {
                            if self.config.read(|c| c.retention_days) == Some(0) {
                                if let Err(err) = self.purge_job(id).await {
                                    warn!("Failed to purge resource {}: {}", id, err);
                                }
                            }
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            debug!("Retention sweeper skipped {} events", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep().await {
                            warn!("Retention sweep failed: {}", err);
                        }
                    }
                }
            }
        })
    }

    /// Delete the file of one completed job and drop its record.
    pub async fn purge_job(&self, id: ResourceId) -> AppResult<bool> {
        let Some(job) = self.scheduler.job(id) else {
            return Ok(false);
        };
        if job.status != JobStatus::Completed {
            return Ok(false);
        }
        if let Some(path) = &job.local_path {
            remove_file_if_exists(path).await?;
        }
        self.scheduler.forget(id).await?;
        info!("🧹 Purged resource {} right after completion", id);
        self.events.emit(DownloadEvent::FilesPurged { count: 1 });
        Ok(true)
    }

    /// Purge everything past the configured age. Returns the number of files removed.
    pub async fn sweep(&self) -> AppResult<usize> {
        let (retention, work_dir) = self
            .config
            .read(|c| (c.retention_days, c.work_directory.clone()));
        let Some(days) = retention else {
            return Ok(0);
        };
        let cutoff = Utc::now() - ChronoDuration::days(i64::from(days));
        let mut purged = 0;

        let jobs = self.scheduler.jobs();
        let mut protected = HashSet::new();
        for job in jobs.iter() {
            match job.status {
                JobStatus::Completed if job.completed_at.map_or(false, |at| at <= cutoff) => {
                    if let Some(path) = &job.local_path {
                        if remove_file_if_exists(path).await? {
                            purged += 1;
                        }
                    }
                    self.scheduler.forget(job.resource_id).await?;
                }
                JobStatus::Completed => {
                    protected.extend(job.local_path.clone());
                }
                _ => {
                    protected.extend(job.local_path.clone());
                    protected.extend(job.partial_path());
                }
            }
        }

        if let Some(work_dir) = work_dir {
            let cutoff: SystemTime = cutoff.into();
            purged += tokio::task::spawn_blocking(move || {
                sweep_week_dirs(&work_dir, cutoff, &protected)
            })
            .await
            .map_err(|e| AppError::System(format!("Retention sweep panicked: {}", e)))?;
        }

        if purged > 0 {
            info!("🧹 Retention sweep removed {} files older than {} days", purged, days);
            self.events.emit(DownloadEvent::FilesPurged { count: purged });
        }
        Ok(purged)
    }
}

/// Remove files under `<work_dir>/<YYYY-Www>/` and `<work_dir>/.archive/<YYYY-Www>/`
/// last modified at or before `cutoff`.
fn sweep_week_dirs(work_dir: &Path, cutoff: SystemTime, protected: &HashSet<PathBuf>) -> usize {
    [work_dir.to_path_buf(), work_dir.join(ARCHIVE_DIR)]
        .iter()
        .map(|root| sweep_root(root, cutoff, protected))
        .sum()
}

fn sweep_root(root: &Path, cutoff: SystemTime, protected: &HashSet<PathBuf>) -> usize {
    let Ok(entries) = std::fs::read_dir(root) else {
        return 0;
    };

    let mut removed = 0;
    for week_dir in entries.filter_map(Result::ok) {
        let is_week = week_dir
            .file_name()
            .to_str()
            .and_then(parse_week_dir_name)
            .is_some();
        if !is_week || !week_dir.path().is_dir() {
            continue;
        }

        for entry in WalkDir::new(week_dir.path()).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(_) => continue,
            };
            let path = entry.path();
            if !entry.file_type().is_file() || is_partial_file(path) || protected.contains(path) {
                continue;
            }
            let modified = entry.metadata().ok().and_then(|m| m.modified().ok());
            if matches!(modified, Some(at) if at <= cutoff) {
                match std::fs::remove_file(path) {
                    Ok(()) => removed += 1,
                    Err(err) => warn!("Failed to remove {:?}: {}", path, err),
                }
            }
        }
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::AppConfig;
    use crate::core::layout::DownloadLayout;
    use crate::core::scheduler::spawn_scheduler;
    use crate::core::test_support::{resource, wait_until, MemoryTransfer};
    use std::sync::Arc;

    struct Setup {
        sweeper: RetentionSweeper,
        scheduler: SchedulerHandle,
        transfer: Arc<MemoryTransfer>,
        dir: tempfile::TempDir,
    }

    fn setup(retention_days: Option<u32>) -> Setup {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigStore::in_memory(AppConfig {
            work_directory: Some(dir.path().to_path_buf()),
            retention_days,
            ..AppConfig::default()
        });
        let transfer = Arc::new(MemoryTransfer::new());
        let events = EventBus::new();
        let (scheduler, _join) = spawn_scheduler(transfer.clone(), config.clone(), events.clone());
        Setup {
            sweeper: RetentionSweeper::new(config, scheduler.clone(), events),
            scheduler,
            transfer,
            dir,
        }
    }

    #[tokio::test]
    async fn test_zero_retention_removes_file_after_completion() {
        let s = setup(Some(0));
        let _task = s.sweeper.clone().spawn(RETENTION_SWEEP_INTERVAL);
        s.transfer.add("https://cdn.test/a.pdf", b"bulletin".to_vec());
        let r = resource(1, "bulletin", "https://cdn.test/a.pdf");
        let path = DownloadLayout::new(s.dir.path()).final_path(&r, false);

        s.scheduler.start(r).await.unwrap();
        wait_until(|| s.scheduler.job(1).is_none()).await;
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_null_retention_keeps_files() {
        let s = setup(None);
        let _task = s.sweeper.clone().spawn(RETENTION_SWEEP_INTERVAL);
        s.transfer.add("https://cdn.test/a.pdf", b"bulletin".to_vec());
        let r = resource(1, "bulletin", "https://cdn.test/a.pdf");

        s.scheduler.start(r).await.unwrap();
        wait_until(|| s.scheduler.job(1).map(|j| j.status) == Some(JobStatus::Completed)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let job = s.scheduler.job(1).unwrap();
        assert!(job.local_path.unwrap().exists());
        assert_eq!(s.sweeper.sweep().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_positive_retention_keeps_recent_files() {
        let s = setup(Some(7));
        s.transfer.add("https://cdn.test/a.pdf", b"bulletin".to_vec());
        s.scheduler
            .start(resource(1, "bulletin", "https://cdn.test/a.pdf"))
            .await
            .unwrap();
        wait_until(|| s.scheduler.job(1).map(|j| j.status) == Some(JobStatus::Completed)).await;

        assert_eq!(s.sweeper.sweep().await.unwrap(), 0);
        assert!(s.scheduler.job(1).is_some());
    }

    #[tokio::test]
    async fn test_sweep_skips_partial_and_active_files() {
        let s = setup(Some(0));
        let week = s.dir.path().join("2026-W02").join("bulletin");
        std::fs::create_dir_all(&week).unwrap();
        std::fs::write(week.join("old.pdf"), b"old").unwrap();
        std::fs::write(week.join("big.mp4.part"), b"partial").unwrap();
        std::fs::write(s.dir.path().join("notes.txt"), b"not in a week dir").unwrap();

        // A paused job owns its final path and partial file.
        let r = resource(2, "bulletin", "https://cdn.test/slow.bin");
        s.transfer.add("https://cdn.test/slow.bin", vec![0u8; 64]);
        s.transfer.set_chunk_size(8);
        s.transfer.hold_after(16);
        s.scheduler.start(r.clone()).await.unwrap();
        wait_until(|| s.transfer.bytes_sent("https://cdn.test/slow.bin") >= 16).await;
        s.scheduler.pause(2).await.unwrap();
        wait_until(|| s.scheduler.job(2).map(|j| j.byte_offset) == Some(16)).await;
        let partial = DownloadLayout::new(s.dir.path()).partial_path(&r, false);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(s.sweeper.sweep().await.unwrap(), 1);

        assert!(!week.join("old.pdf").exists());
        assert!(week.join("big.mp4.part").exists());
        assert!(partial.exists());
        assert!(s.dir.path().join("notes.txt").exists());
    }

    #[tokio::test]
    async fn test_sweep_covers_superseded_copies() {
        let s = setup(Some(7));
        let layout = DownloadLayout::new(s.dir.path());
        let archived = layout.superseded_dir(crate::core::models::WeekIdentifier::new(2026, 2));
        std::fs::create_dir_all(&archived).unwrap();
        let old = archived.join("20260107T100000Z-old.pdf");
        let recent = archived.join("recent.pdf");
        std::fs::write(&old, b"old").unwrap();
        std::fs::write(&recent, b"recent").unwrap();

        let long_ago = SystemTime::now() - Duration::from_secs(30 * 24 * 60 * 60);
        std::fs::File::options()
            .write(true)
            .open(&old)
            .unwrap()
            .set_modified(long_ago)
            .unwrap();

        assert_eq!(s.sweeper.sweep().await.unwrap(), 1);
        assert!(!old.exists());
        assert!(recent.exists());
    }
}

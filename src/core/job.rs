//! Download job state machine and the worker that drives one transfer
//!
//! ```text
//! Pending ──▶ Downloading ──▶ Completed
//!                 │  ▲
//!                 ▼  │ start
//!        Paused / Error ──▶ removed (cancel)
//! ```
//!
//! Transitions are plain synchronous methods on [`DownloadJob`]; only the
//! scheduler calls them. The worker never touches the job map: it reports
//! [`JobUpdate`]s through a channel and the scheduler decides what they mean.

use chrono::Utc;
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::downloader::{
    StopReason, Transfer, TransferControl, TransferOutcome, TransferRequest,
};
use crate::core::error_handling::DownloadError;
use crate::core::integrity_checker::verify_file;
use crate::core::layout::shortcut_contents;
use crate::core::models::{DownloadJob, Integrity, JobStatus, Resource, ResourceId};
use crate::core::progress_tracker::{percent, ProgressThrottle};
use crate::utils::file_utils::{partial_path_for, remove_file_if_exists};

impl DownloadJob {
    pub fn new(resource: Resource) -> Self {
        let now = Utc::now();
        Self {
            resource_id: resource.id,
            resource,
            status: JobStatus::Pending,
            progress: 0,
            current_bytes: 0,
            total_bytes: 0,
            queue_position: None,
            retry_count: 0,
            error_message: None,
            integrity: Integrity::Unknown,
            byte_offset: 0,
            version: 1,
            local_path: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }

    /// Paused → Pending, keeping the resume offset.
    pub fn requeue(&mut self) {
        self.status = JobStatus::Pending;
        self.touch();
    }

    /// Error → Pending, resuming from the last recorded offset.
    pub fn retry(&mut self) {
        self.status = JobStatus::Pending;
        self.error_message = None;
        self.retry_count += 1;
        self.touch();
    }

    /// Pending → Downloading
    pub fn begin(&mut self) {
        self.status = JobStatus::Downloading;
        self.queue_position = None;
        self.current_bytes = self.byte_offset;
        self.touch();
    }

    /// Apply a progress sample. Ignored unless downloading; progress never decreases.
    pub fn apply_progress(&mut self, current_bytes: u64, total_bytes: u64) -> bool {
        if self.status != JobStatus::Downloading {
            return false;
        }
        self.current_bytes = current_bytes;
        if total_bytes > 0 {
            self.total_bytes = total_bytes;
        }
        self.progress = self.progress.max(percent(current_bytes, self.total_bytes));
        self.touch();
        true
    }

    /// Downloading → Paused, remembering where to resume.
    pub fn mark_paused(&mut self, bytes_on_disk: u64) {
        self.status = JobStatus::Paused;
        self.record_offset(bytes_on_disk);
    }

    /// Refresh the resume offset once the transfer has actually stopped.
    pub fn record_offset(&mut self, bytes_on_disk: u64) {
        self.byte_offset = bytes_on_disk;
        self.current_bytes = bytes_on_disk;
        self.touch();
    }

    pub fn mark_completed(&mut self, path: PathBuf, bytes: u64, integrity: Integrity) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.current_bytes = bytes;
        self.total_bytes = self.total_bytes.max(bytes);
        self.byte_offset = 0;
        self.integrity = integrity;
        self.local_path = Some(path);
        self.error_message = None;
        self.completed_at = Some(Utc::now());
        self.touch();
    }

    pub fn mark_failed(&mut self, message: impl Into<String>, bytes_on_disk: u64) {
        self.status = JobStatus::Error;
        self.error_message = Some(message.into());
        self.record_offset(bytes_on_disk);
    }

    /// Visible only until the partial file has been removed.
    pub fn mark_cancelling(&mut self) {
        self.status = JobStatus::Cancelled;
        self.queue_position = None;
        self.touch();
    }

    pub fn set_queue_position(&mut self, position: Option<usize>) -> bool {
        if self.queue_position == position {
            return false;
        }
        self.queue_position = position;
        self.touch();
        true
    }

    pub fn partial_path(&self) -> Option<PathBuf> {
        self.local_path.as_deref().map(partial_path_for)
    }
}

/// Everything a worker needs to run one transfer
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub id: ResourceId,
    pub generation: u64,
    pub resource: Resource,
    pub url: String,
    pub final_path: PathBuf,
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed {
        path: PathBuf,
        bytes: u64,
        integrity: Integrity,
    },
    Stopped {
        reason: StopReason,
        bytes: u64,
    },
    Failed {
        error: DownloadError,
        bytes: u64,
    },
}

/// Messages from workers and cleanup tasks back to the scheduler
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Progress {
        id: ResourceId,
        generation: u64,
        current_bytes: u64,
        total_bytes: u64,
    },
    Finished {
        id: ResourceId,
        generation: u64,
        outcome: WorkerOutcome,
    },
    /// Partial data for a cancelled job is gone
    Cleaned { id: ResourceId },
}

/// Run one transfer to completion, stop or failure and report the result.
pub async fn run_job(
    spec: JobSpec,
    transfer: Arc<dyn Transfer>,
    mut control: watch::Receiver<TransferControl>,
    updates: mpsc::UnboundedSender<JobUpdate>,
) {
    let id = spec.id;
    let generation = spec.generation;

    let outcome = if spec.resource.is_shortcut() {
        write_shortcut(&spec).await
    } else {
        download(&spec, transfer.as_ref(), &mut control, &updates).await
    };

    debug!("Worker for resource {} finished: {:?}", id, outcome);
    let _ = updates.send(JobUpdate::Finished {
        id,
        generation,
        outcome,
    });
}

async fn write_shortcut(spec: &JobSpec) -> WorkerOutcome {
    let content = shortcut_contents(&spec.resource.title, &spec.resource.download_url);
    let result = async {
        if let Some(parent) = spec.final_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&spec.final_path, content.as_bytes()).await
    }
    .await;

    match result {
        Ok(()) => {
            info!("🔗 Shortcut created: {:?}", spec.final_path);
            WorkerOutcome::Completed {
                path: spec.final_path.clone(),
                bytes: content.len() as u64,
                // Nothing to hash: the link itself is the content.
                integrity: Integrity::Verified,
            }
        }
        Err(err) => WorkerOutcome::Failed {
            error: DownloadError::filesystem(&err, &spec.final_path),
            bytes: 0,
        },
    }
}

async fn download(
    spec: &JobSpec,
    transfer: &dyn Transfer,
    control: &mut watch::Receiver<TransferControl>,
    updates: &mpsc::UnboundedSender<JobUpdate>,
) -> WorkerOutcome {
    let partial_path = partial_path_for(&spec.final_path);
    let request = TransferRequest {
        url: spec.url.clone(),
        partial_path: partial_path.clone(),
        offset: spec.offset,
    };

    let throttle = Mutex::new(ProgressThrottle::default());
    let report = |current_bytes: u64, total_bytes: u64| {
        let _ = updates.send(JobUpdate::Progress {
            id: spec.id,
            generation: spec.generation,
            current_bytes,
            total_bytes,
        });
    };
    let on_progress = |current_bytes: u64, total_bytes: u64| {
        if throttle.lock().should_emit(Instant::now()) {
            report(current_bytes, total_bytes);
        }
    };

    match transfer.fetch(&request, control, &on_progress).await {
        Ok(TransferOutcome::Finished { bytes, total }) => {
            report(bytes, total);
            finalize(spec, &partial_path, bytes).await
        }
        Ok(TransferOutcome::Stopped { reason, bytes, .. }) => {
            info!("⏸️ Transfer for resource {} stopped ({:?}) at {} bytes", spec.id, reason, bytes);
            WorkerOutcome::Stopped { reason, bytes }
        }
        Err(err) => {
            let bytes = tokio::fs::metadata(&partial_path)
                .await
                .map(|m| m.len())
                .unwrap_or(spec.offset);
            warn!("❌ Transfer for resource {} failed: {}", spec.id, err);
            WorkerOutcome::Failed { error: err, bytes }
        }
    }
}

/// Move the partial file into place, then verify it when a checksum is known.
async fn finalize(spec: &JobSpec, partial_path: &std::path::Path, bytes: u64) -> WorkerOutcome {
    if let Err(err) = remove_file_if_exists(&spec.final_path).await {
        return WorkerOutcome::Failed {
            error: DownloadError::filesystem(&err, &spec.final_path),
            bytes,
        };
    }
    if let Err(err) = tokio::fs::rename(partial_path, &spec.final_path).await {
        return WorkerOutcome::Failed {
            error: DownloadError::filesystem(&err, partial_path),
            bytes,
        };
    }

    let integrity = match spec.resource.checksum.as_deref() {
        Some(expected) if !expected.trim().is_empty() => {
            match verify_file(&spec.final_path, expected).await {
                Ok(result) if result.integrity == Integrity::Mismatch => {
                    // Kept on disk and flagged; the operator decides what to do with it.
                    let err = DownloadError::IntegrityMismatch {
                        expected: result.expected_hash,
                        actual: result.computed_hash,
                    };
                    warn!(
                        "⚠️ Resource {} kept despite {:?} failure: {}",
                        spec.id,
                        err.category(),
                        err
                    );
                    Integrity::Mismatch
                }
                Ok(result) => result.integrity,
                Err(err) => {
                    warn!("Integrity check for resource {} failed to run: {}", spec.id, err);
                    Integrity::Unknown
                }
            }
        }
        _ => Integrity::Unknown,
    };

    info!("✅ Download complete: {:?} ({} bytes)", spec.final_path, bytes);
    WorkerOutcome::Completed {
        path: spec.final_path.clone(),
        bytes,
        integrity,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error_handling::ErrorCategory;
    use crate::core::test_support::{resource, MemoryTransfer};

    fn spec_for(resource: Resource, final_path: PathBuf) -> JobSpec {
        JobSpec {
            id: resource.id,
            generation: 1,
            url: resource.download_url.clone(),
            resource,
            final_path,
            offset: 0,
        }
    }

    async fn collect(mut rx: mpsc::UnboundedReceiver<JobUpdate>) -> Vec<JobUpdate> {
        let mut out = Vec::new();
        while let Some(update) = rx.recv().await {
            out.push(update);
        }
        out
    }

    #[test]
    fn test_progress_is_monotonic_while_downloading() {
        let mut job = DownloadJob::new(resource(1, "bulletin", "https://x/a.pdf"));
        assert!(!job.apply_progress(10, 100), "pending jobs ignore progress");

        job.begin();
        assert!(job.apply_progress(50, 100));
        assert_eq!(job.progress, 50);
        job.apply_progress(20, 100);
        assert_eq!(job.progress, 50);
        job.apply_progress(100, 100);
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_versions_increase_on_every_transition() {
        let mut job = DownloadJob::new(resource(1, "bulletin", "https://x/a.pdf"));
        let v0 = job.version;
        job.begin();
        let v1 = job.version;
        job.mark_paused(10);
        let v2 = job.version;
        job.requeue();
        assert!(v0 < v1 && v1 < v2 && v2 < job.version);
        assert_eq!(job.byte_offset, 10);
    }

    #[test]
    fn test_retry_clears_error() {
        let mut job = DownloadJob::new(resource(1, "bulletin", "https://x/a.pdf"));
        job.begin();
        job.mark_failed("boom", 5);
        assert_eq!(job.status, JobStatus::Error);
        job.retry();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.retry_count, 1);
        assert_eq!(job.error_message, None);
        assert_eq!(job.byte_offset, 5);
    }

    #[tokio::test]
    async fn test_worker_completes_and_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = resource(1, "bulletin", "https://cdn.test/hello.txt");
        r.checksum =
            Some("2CF24DBA5FB0A30E26E83B2AC5B9E29E1B161E5C1FA7425E73043362938B9824".into());
        let transfer = Arc::new(MemoryTransfer::new());
        transfer.add("https://cdn.test/hello.txt", b"hello".to_vec());

        let final_path = dir.path().join("hello.txt");
        let (_control_tx, control_rx) = watch::channel(TransferControl::Run);
        let (tx, rx) = mpsc::unbounded_channel();
        run_job(spec_for(r, final_path.clone()), transfer, control_rx, tx).await;

        let updates = collect(rx).await;
        assert_eq!(
            updates.last(),
            Some(&JobUpdate::Finished {
                id: 1,
                generation: 1,
                outcome: WorkerOutcome::Completed {
                    path: final_path.clone(),
                    bytes: 5,
                    integrity: Integrity::Verified,
                },
            })
        );
        assert!(final_path.exists());
        assert!(!partial_path_for(&final_path).exists());
    }

    #[tokio::test]
    async fn test_worker_reports_failure_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let r = resource(2, "bulletin", "https://cdn.test/missing.pdf");
        let transfer = Arc::new(MemoryTransfer::new());

        let (_control_tx, control_rx) = watch::channel(TransferControl::Run);
        let (tx, rx) = mpsc::unbounded_channel();
        run_job(
            spec_for(r, dir.path().join("missing.pdf")),
            transfer,
            control_rx,
            tx,
        )
        .await;

        match collect(rx).await.pop() {
            Some(JobUpdate::Finished {
                outcome: WorkerOutcome::Failed { error, bytes },
                ..
            }) => {
                assert_eq!(bytes, 0);
                assert_eq!(error.category(), ErrorCategory::Network);
            }
            other => panic!("unexpected update: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_checksum_mismatch_keeps_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut r = resource(4, "bulletin", "https://cdn.test/hello.txt");
        r.checksum = Some("md5:00000000000000000000000000000000".into());
        let transfer = Arc::new(MemoryTransfer::new());
        transfer.add("https://cdn.test/hello.txt", b"hello".to_vec());

        let final_path = dir.path().join("hello.txt");
        let (_control_tx, control_rx) = watch::channel(TransferControl::Run);
        let (tx, rx) = mpsc::unbounded_channel();
        run_job(spec_for(r, final_path.clone()), transfer, control_rx, tx).await;

        match collect(rx).await.pop() {
            Some(JobUpdate::Finished {
                outcome: WorkerOutcome::Completed { integrity, .. },
                ..
            }) => assert_eq!(integrity, Integrity::Mismatch),
            other => panic!("unexpected update: {:?}", other),
        }
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_shortcut_resources_skip_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let r = resource(3, "video", "https://youtu.be/abc");
        let transfer = Arc::new(MemoryTransfer::new());
        let final_path = dir.path().join("video").join("Resource 3.desktop");

        let (_control_tx, control_rx) = watch::channel(TransferControl::Run);
        let (tx, rx) = mpsc::unbounded_channel();
        run_job(spec_for(r, final_path.clone()), transfer.clone(), control_rx, tx).await;

        assert_eq!(transfer.fetch_count(), 0);
        let content = std::fs::read_to_string(&final_path).unwrap();
        assert!(content.contains("https://youtu.be/abc"));
        match collect(rx).await.pop() {
            Some(JobUpdate::Finished {
                outcome: WorkerOutcome::Completed { integrity, .. },
                ..
            }) => assert_eq!(integrity, Integrity::Verified),
            other => panic!("unexpected update: {:?}", other),
        }
    }
}

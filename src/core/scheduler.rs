//! Queue scheduler
//!
//! The scheduler is an actor: one task owns the job map and is its only writer.
//! External commands arrive over a bounded channel, worker reports over an
//! unbounded one, and both are handled one at a time by the same loop, so every
//! mutation is a short synchronous step with no lock held across an await.
//!
//! After every step the loop re-runs admission (keep up to N transfers running,
//! lowest arrival first), recomputes queue positions and publishes a fresh job
//! snapshot through a `watch` channel. Queue membership changes are additionally
//! broadcast as coalesced `queue-status-changed` events.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, instrument, warn};

use crate::core::config::ConfigStore;
use crate::core::downloader::{StopReason, Transfer, TransferControl};
use crate::core::error_handling::RetryExecutor;
use crate::core::events::{DownloadEvent, EventBus};
use crate::core::job::{run_job, JobSpec, JobUpdate, WorkerOutcome};
use crate::core::layout::DownloadLayout;
use crate::core::models::{
    AppError, AppResult, DownloadJob, Integrity, JobStatus, QueueStatus, QueuedEntry, Resource,
    ResourceId,
};
use crate::utils::file_utils::remove_file_if_exists;

const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Minimum spacing between two `queue-status-changed` events
pub const QUEUE_STATUS_INTERVAL: Duration = Duration::from_millis(300);

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// What a start request did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartOutcome {
    /// New job appended to the queue
    Queued,
    /// Completed job replaced by a fresh one
    Restarted,
    /// Paused job re-queued
    Resumed,
    /// Failed job re-queued
    Retried,
    AlreadyQueued,
    AlreadyDownloading,
}

/// Commands understood by the scheduler loop.
#[derive(Debug)]
pub enum SchedulerCommand {
    Start {
        resource: Resource,
        respond_to: oneshot::Sender<AppResult<StartOutcome>>,
    },
    Pause {
        id: ResourceId,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    Cancel {
        id: ResourceId,
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Re-run admission, e.g. after the download mode changed
    Reschedule {
        respond_to: oneshot::Sender<AppResult<()>>,
    },
    /// Drop a completed job record once its file has been purged
    Forget {
        id: ResourceId,
        respond_to: oneshot::Sender<AppResult<bool>>,
    },
    Shutdown {
        respond_to: oneshot::Sender<AppResult<()>>,
    },
}

/// Handle exposed to commands, the poller and the policy engine.
#[derive(Debug, Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    board: watch::Receiver<Arc<Vec<DownloadJob>>>,
    retry: RetryExecutor,
}

impl SchedulerHandle {
    async fn send_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> SchedulerCommand,
    ) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| AppError::System(format!("Scheduler unavailable: {}", e)))?;
        rx.await
            .map_err(|_| AppError::System("Scheduler dropped response".into()))?
    }

    /// Like `send_command`, but reports a saturated command path as contention
    /// instead of waiting for room.
    async fn try_command<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<AppResult<T>>) -> SchedulerCommand,
    ) -> AppResult<T> {
        let (tx, rx) = oneshot::channel();
        self.sender.try_send(build(tx)).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => {
                AppError::LockContention("scheduler command queue is full".into())
            }
            mpsc::error::TrySendError::Closed(_) => {
                AppError::System("Scheduler unavailable".into())
            }
        })?;
        rx.await
            .map_err(|_| AppError::System("Scheduler dropped response".into()))?
    }

    pub async fn start(&self, resource: Resource) -> AppResult<StartOutcome> {
        self.send_command(|tx| SchedulerCommand::Start {
            resource,
            respond_to: tx,
        })
        .await
    }

    /// Pause a running transfer, retrying briefly if the command path is saturated.
    pub async fn pause(&self, id: ResourceId) -> AppResult<()> {
        self.retry
            .execute("pause", || {
                self.try_command(|tx| SchedulerCommand::Pause { id, respond_to: tx })
            })
            .await
    }

    /// Cancel a job and wait until its partial data is gone.
    pub async fn cancel(&self, id: ResourceId) -> AppResult<()> {
        self.retry
            .execute("cancel", || {
                self.try_command(|tx| SchedulerCommand::Cancel { id, respond_to: tx })
            })
            .await
    }

    pub async fn reschedule(&self) -> AppResult<()> {
        self.send_command(|tx| SchedulerCommand::Reschedule { respond_to: tx })
            .await
    }

    pub async fn forget(&self, id: ResourceId) -> AppResult<bool> {
        self.send_command(|tx| SchedulerCommand::Forget { id, respond_to: tx })
            .await
    }

    pub async fn shutdown(&self) -> AppResult<()> {
        self.send_command(|tx| SchedulerCommand::Shutdown { respond_to: tx })
            .await
    }

    /// Current job snapshot, ordered by arrival.
    pub fn jobs(&self) -> Arc<Vec<DownloadJob>> {
        self.board.borrow().clone()
    }

    pub fn job(&self, id: ResourceId) -> Option<DownloadJob> {
        self.board
            .borrow()
            .iter()
            .find(|job| job.resource_id == id)
            .cloned()
    }

    /// Receiver that wakes on every published snapshot
    pub fn watch_jobs(&self) -> watch::Receiver<Arc<Vec<DownloadJob>>> {
        self.board.clone()
    }
}

/// Spawn the scheduler loop on the current tokio runtime.
pub fn spawn_scheduler(
    transfer: Arc<dyn Transfer>,
    config: ConfigStore,
    events: EventBus,
) -> (SchedulerHandle, JoinHandle<()>) {
    spawn_scheduler_with(transfer, config, events, RetryExecutor::default())
}

pub fn spawn_scheduler_with(
    transfer: Arc<dyn Transfer>,
    config: ConfigStore,
    events: EventBus,
    retry: RetryExecutor,
) -> (SchedulerHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (scheduler, update_rx, board_rx) = Scheduler::new(transfer, config, events);

    info!("[SCHEDULER] Spawning scheduler loop");
    let join = tokio::spawn(scheduler.run(cmd_rx, update_rx));

    let handle = SchedulerHandle {
        sender: cmd_tx,
        board: board_rx,
        retry,
    };
    (handle, join)
}

struct JobEntry {
    job: DownloadJob,
    arrival: u64,
    /// Fixed at first admission so a resumed job keeps writing the same partial file
    source_url: Option<String>,
    cancel_waiters: Vec<oneshot::Sender<AppResult<()>>>,
}

struct WorkerSlot {
    generation: u64,
    control: watch::Sender<TransferControl>,
    handle: JoinHandle<()>,
}

/// Emits queue status on the leading edge, then at most once per interval.
#[derive(Debug)]
struct QueueStatusCoalescer {
    interval: Duration,
    last_sent: Option<QueueStatus>,
    last_emit: Option<Instant>,
    deadline: Option<Instant>,
}

impl QueueStatusCoalescer {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_emit: None,
            deadline: None,
        }
    }

    /// Returns the status to emit now, or schedules a trailing emission.
    fn observe(&mut self, status: &QueueStatus, now: Instant) -> Option<QueueStatus> {
        if self.last_sent.as_ref() == Some(status) {
            self.deadline = None;
            return None;
        }
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.interval => {
                self.deadline.get_or_insert(last + self.interval);
                None
            }
            _ => self.record(status, now),
        }
    }

    fn flush(&mut self, status: &QueueStatus, now: Instant) -> Option<QueueStatus> {
        self.deadline = None;
        if self.last_sent.as_ref() == Some(status) {
            return None;
        }
        self.record(status, now)
    }

    fn record(&mut self, status: &QueueStatus, now: Instant) -> Option<QueueStatus> {
        self.deadline = None;
        self.last_emit = Some(now);
        self.last_sent = Some(status.clone());
        Some(status.clone())
    }
}

struct Scheduler {
    jobs: HashMap<ResourceId, JobEntry>,
    workers: HashMap<ResourceId, WorkerSlot>,
    next_arrival: u64,
    next_generation: u64,
    transfer: Arc<dyn Transfer>,
    config: ConfigStore,
    events: EventBus,
    updates: mpsc::UnboundedSender<JobUpdate>,
    board: watch::Sender<Arc<Vec<DownloadJob>>>,
    /// Events held back until the snapshot that explains them is published
    outbox: Vec<DownloadEvent>,
    queue_status: QueueStatusCoalescer,
}

impl Scheduler {
    fn new(
        transfer: Arc<dyn Transfer>,
        config: ConfigStore,
        events: EventBus,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<JobUpdate>,
        watch::Receiver<Arc<Vec<DownloadJob>>>,
    ) {
        let (update_tx, update_rx) = mpsc::unbounded_channel();
        let (board_tx, board_rx) = watch::channel(Arc::new(Vec::new()));
        let scheduler = Self {
            jobs: HashMap::new(),
            workers: HashMap::new(),
            next_arrival: 0,
            next_generation: 0,
            transfer,
            config,
            events,
            updates: update_tx,
            board: board_tx,
            outbox: Vec::new(),
            queue_status: QueueStatusCoalescer::new(QUEUE_STATUS_INTERVAL),
        };
        (scheduler, update_rx, board_rx)
    }

    async fn run(
        mut self,
        mut commands: mpsc::Receiver<SchedulerCommand>,
        mut updates: mpsc::UnboundedReceiver<JobUpdate>,
    ) {
        loop {
            let deadline = self.queue_status.deadline;
            let flush_at = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                biased;
                Some(update) = updates.recv() => self.handle_update(update),
                command = commands.recv() => match command {
                    Some(SchedulerCommand::Shutdown { respond_to }) => {
                        self.shutdown().await;
                        let _ = respond_to.send(Ok(()));
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => {
                        self.shutdown().await;
                        break;
                    }
                },
                _ = sleep_until(flush_at), if deadline.is_some() => {
                    let status = self.queue_snapshot();
                    if let Some(status) = self.queue_status.flush(&status, Instant::now()) {
                        self.events.emit(DownloadEvent::queue_status(status));
                    }
                }
            }
        }
        debug!("[SCHEDULER] Command channel closed, exiting scheduler loop");
    }

    fn handle_command(&mut self, command: SchedulerCommand) {
        match command {
            SchedulerCommand::Start {
                resource,
                respond_to,
            } => {
                let result = self.start(resource);
                let _ = respond_to.send(result);
            }
            SchedulerCommand::Pause { id, respond_to } => {
                let result = self.pause(id);
                let _ = respond_to.send(result);
            }
            SchedulerCommand::Cancel { id, respond_to } => self.cancel(id, respond_to),
            SchedulerCommand::Reschedule { respond_to } => {
                self.after_change();
                let _ = respond_to.send(Ok(()));
            }
            SchedulerCommand::Forget { id, respond_to } => {
                let forgotten = match self.jobs.get(&id) {
                    Some(entry) if entry.job.status == JobStatus::Completed => {
                        self.jobs.remove(&id);
                        true
                    }
                    _ => false,
                };
                if forgotten {
                    self.after_change();
                }
                let _ = respond_to.send(Ok(forgotten));
            }
            // Handled by the loop itself
            SchedulerCommand::Shutdown { respond_to } => {
                let _ = respond_to.send(Ok(()));
            }
        }
    }

    #[instrument(skip(self, resource), fields(id = resource.id))]
    fn start(&mut self, resource: Resource) -> AppResult<StartOutcome> {
        let id = resource.id;
        let arrival = self.next_arrival;
        self.next_arrival += 1;

        let outcome = match self.jobs.get_mut(&id) {
            None => {
                self.jobs.insert(id, new_entry(resource, arrival));
                StartOutcome::Queued
            }
            Some(entry) => match entry.job.status {
                JobStatus::Downloading => return Ok(StartOutcome::AlreadyDownloading),
                JobStatus::Pending => return Ok(StartOutcome::AlreadyQueued),
                JobStatus::Cancelled => {
                    return Err(AppError::InvalidState {
                        id,
                        action: "start",
                        status: JobStatus::Cancelled,
                    })
                }
                JobStatus::Paused => {
                    entry.job.requeue();
                    entry.arrival = arrival;
                    StartOutcome::Resumed
                }
                JobStatus::Error => {
                    entry.job.retry();
                    entry.arrival = arrival;
                    StartOutcome::Retried
                }
                JobStatus::Completed => {
                    let version = entry.job.version;
                    *entry = new_entry(resource, arrival);
                    entry.job.version = version + 1;
                    StartOutcome::Restarted
                }
            },
        };

        info!("📥 Download request for resource {}: {:?}", id, outcome);
        self.after_change();
        Ok(outcome)
    }

    #[instrument(skip(self))]
    fn pause(&mut self, id: ResourceId) -> AppResult<()> {
        let entry = self.jobs.get_mut(&id).ok_or(AppError::JobNotFound(id))?;
        if entry.job.status != JobStatus::Downloading {
            return Err(AppError::InvalidState {
                id,
                action: "pause",
                status: entry.job.status,
            });
        }

        let bytes = entry.job.current_bytes;
        entry.job.mark_paused(bytes);
        if let Some(worker) = self.workers.get(&id) {
            let _ = worker.control.send(TransferControl::Pause);
        }

        info!("⏸️ Paused resource {} at {} bytes", id, bytes);
        self.outbox.push(DownloadEvent::DownloadPaused { id });
        self.after_change();
        Ok(())
    }

    #[instrument(skip(self, respond_to))]
    fn cancel(&mut self, id: ResourceId, respond_to: oneshot::Sender<AppResult<()>>) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            let _ = respond_to.send(Err(AppError::JobNotFound(id)));
            return;
        };

        match entry.job.status {
            JobStatus::Completed => {
                let _ = respond_to.send(Err(AppError::InvalidState {
                    id,
                    action: "cancel",
                    status: JobStatus::Completed,
                }));
                return;
            }
            JobStatus::Cancelled => {
                entry.cancel_waiters.push(respond_to);
                return;
            }
            _ => {}
        }

        entry.job.mark_cancelling();
        entry.cancel_waiters.push(respond_to);
        let partial = entry.job.partial_path();

        match self.workers.get(&id) {
            // Cleanup runs once the worker has let go of the partial file.
            Some(worker) => {
                let _ = worker.control.send(TransferControl::Cancel);
            }
            None => spawn_cleanup(self.updates.clone(), id, partial, None),
        }

        info!("🛑 Cancelling resource {}", id);
        self.after_change();
    }

    fn handle_update(&mut self, update: JobUpdate) {
        match update {
            JobUpdate::Progress {
                id,
                generation,
                current_bytes,
                total_bytes,
            } => {
                if !self.is_current_worker(id, generation) {
                    return;
                }
                let Some(entry) = self.jobs.get_mut(&id) else {
                    return;
                };
                if entry.job.apply_progress(current_bytes, total_bytes) {
                    self.outbox.push(DownloadEvent::DownloadProgress {
                        id,
                        progress: entry.job.progress,
                        current_bytes: entry.job.current_bytes,
                        total_bytes: entry.job.total_bytes,
                    });
                    self.publish();
                }
            }
            JobUpdate::Finished {
                id,
                generation,
                outcome,
            } => {
                if !self.is_current_worker(id, generation) {
                    debug!("Ignoring stale report for resource {} (generation {})", id, generation);
                    return;
                }
                self.workers.remove(&id);
                self.apply_outcome(id, outcome);
                self.after_change();
            }
            JobUpdate::Cleaned { id } => {
                if let Some(entry) = self.jobs.remove(&id) {
                    for waiter in entry.cancel_waiters {
                        let _ = waiter.send(Ok(()));
                    }
                    info!("🗑️ Removed download for resource {}", id);
                    self.outbox.push(DownloadEvent::DownloadCancelled { id });
                }
                self.after_change();
            }
        }
    }

    fn apply_outcome(&mut self, id: ResourceId, outcome: WorkerOutcome) {
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };

        match (entry.job.status, outcome) {
            (JobStatus::Cancelled, outcome) => {
                // Cancel wins over anything the worker produced meanwhile.
                let finished_file = match outcome {
                    WorkerOutcome::Completed { path, .. } => Some(path),
                    _ => None,
                };
                let partial = entry.job.partial_path();
                spawn_cleanup(self.updates.clone(), id, partial, finished_file);
            }
            (
                JobStatus::Paused | JobStatus::Pending | JobStatus::Downloading,
                WorkerOutcome::Completed {
                    path,
                    bytes,
                    integrity,
                },
            ) => {
                // A pause (or a resume queued behind it) racing with the last
                // chunk loses to completion.
                entry.job.mark_completed(path, bytes, integrity);
                self.outbox.push(DownloadEvent::DownloadComplete { id });
                if integrity != Integrity::Unknown {
                    self.outbox
                        .push(DownloadEvent::IntegrityChecked { id, integrity });
                }
            }
            // Stopped after a user pause, possibly already resumed: the next
            // transfer starts from what is actually on disk.
            (
                JobStatus::Paused | JobStatus::Pending,
                WorkerOutcome::Stopped { bytes, .. } | WorkerOutcome::Failed { bytes, .. },
            ) => {
                entry.job.record_offset(bytes);
            }
            (JobStatus::Downloading, WorkerOutcome::Stopped { reason, bytes }) => {
                if reason == StopReason::Cancelled {
                    warn!("Transfer for resource {} stopped without a cancel request", id);
                }
                entry.job.mark_paused(bytes);
                self.outbox.push(DownloadEvent::DownloadPaused { id });
            }
            (JobStatus::Downloading, WorkerOutcome::Failed { error, bytes }) => {
                warn!(
                    "❌ Download failed for resource {} ({:?}): {}",
                    id,
                    error.category(),
                    error
                );
                let error = error.to_string();
                entry.job.mark_failed(error.clone(), bytes);
                self.outbox.push(DownloadEvent::DownloadFailed { id, error });
            }
            (status, outcome) => {
                debug!(
                    "Ignoring worker outcome {:?} for resource {} in state {:?}",
                    outcome, id, status
                );
            }
        }
    }

    fn is_current_worker(&self, id: ResourceId, generation: u64) -> bool {
        self.workers
            .get(&id)
            .map(|worker| worker.generation == generation)
            .unwrap_or(false)
    }

    /// Admission, queue positions, snapshot and queue-status notification.
    fn after_change(&mut self) {
        self.admit();
        self.refresh_positions();
        self.publish();

        let status = self.queue_snapshot();
        if let Some(status) = self.queue_status.observe(&status, Instant::now()) {
            self.events.emit(DownloadEvent::queue_status(status));
        }
    }

    fn admit(&mut self) {
        let limit = self.config.read(|c| c.download_mode).concurrency();
        while self.workers.len() < limit {
            let next = self
                .jobs
                .values()
                .filter(|entry| {
                    entry.job.status == JobStatus::Pending
                        && !self.workers.contains_key(&entry.job.resource_id)
                })
                .min_by_key(|entry| entry.arrival)
                .map(|entry| entry.job.resource_id);

            match next {
                Some(id) => self.promote(id),
                None => break,
            }
        }
    }

    fn promote(&mut self, id: ResourceId) {
        let (work_dir, prefer_optimized) =
            self.config
                .read(|c| (c.work_directory.clone(), c.prefer_optimized));
        let Some(entry) = self.jobs.get_mut(&id) else {
            return;
        };

        let Some(work_dir) = work_dir else {
            let offset = entry.job.byte_offset;
            entry.job.begin();
            entry
                .job
                .mark_failed(AppError::WorkDirectoryNotSet.to_string(), offset);
            self.outbox.push(DownloadEvent::DownloadFailed {
                id,
                error: AppError::WorkDirectoryNotSet.to_string(),
            });
            return;
        };

        if entry.job.local_path.is_none() || entry.source_url.is_none() {
            let layout = DownloadLayout::new(work_dir);
            entry.job.local_path = Some(layout.final_path(&entry.job.resource, prefer_optimized));
            entry.source_url = Some(
                entry
                    .job
                    .resource
                    .source_url(prefer_optimized)
                    .to_string(),
            );
        }

        entry.job.begin();

        let generation = self.next_generation;
        self.next_generation += 1;

        let spec = JobSpec {
            id,
            generation,
            resource: entry.job.resource.clone(),
            url: entry
                .source_url
                .clone()
                .unwrap_or_else(|| entry.job.resource.download_url.clone()),
            final_path: entry.job.local_path.clone().unwrap_or_default(),
            offset: entry.job.byte_offset,
        };

        let (control_tx, control_rx) = watch::channel(TransferControl::Run);
        let handle = tokio::spawn(run_job(
            spec,
            self.transfer.clone(),
            control_rx,
            self.updates.clone(),
        ));
        self.workers.insert(
            id,
            WorkerSlot {
                generation,
                control: control_tx,
                handle,
            },
        );

        info!(
            "▶️ Started resource {} from byte {}",
            id, entry.job.byte_offset
        );
        self.outbox.push(DownloadEvent::DownloadStarted { id });
    }

    fn refresh_positions(&mut self) {
        let mut pending: Vec<(u64, ResourceId)> = self
            .jobs
            .values()
            .filter(|entry| entry.job.status == JobStatus::Pending)
            .map(|entry| (entry.arrival, entry.job.resource_id))
            .collect();
        pending.sort_unstable();

        let ranks: HashMap<ResourceId, usize> = pending
            .iter()
            .enumerate()
            .map(|(index, (_, id))| (*id, index + 1))
            .collect();

        for entry in self.jobs.values_mut() {
            let position = ranks.get(&entry.job.resource_id).copied();
            entry.job.set_queue_position(position);
        }
    }

    fn queue_snapshot(&self) -> QueueStatus {
        let mut queued: Vec<QueuedEntry> = self
            .jobs
            .values()
            .filter_map(|entry| {
                entry.job.queue_position.map(|position| QueuedEntry {
                    id: entry.job.resource_id,
                    position,
                })
            })
            .collect();
        queued.sort_unstable_by_key(|entry| entry.position);

        let mut active: Vec<(u64, ResourceId)> = self
            .jobs
            .values()
            .filter(|entry| entry.job.status == JobStatus::Downloading)
            .map(|entry| (entry.arrival, entry.job.resource_id))
            .collect();
        active.sort_unstable();

        QueueStatus {
            queued,
            active: active.into_iter().map(|(_, id)| id).collect(),
        }
    }

    fn publish(&mut self) {
        let mut entries: Vec<&JobEntry> = self.jobs.values().collect();
        entries.sort_unstable_by_key(|entry| entry.arrival);
        let jobs = entries.into_iter().map(|entry| entry.job.clone()).collect();
        self.board.send_replace(Arc::new(jobs));

        for event in self.outbox.drain(..) {
            self.events.emit(event);
        }
    }

    async fn shutdown(&mut self) {
        info!("[SCHEDULER] Shutting down, pausing {} transfers", self.workers.len());
        let handles: Vec<JoinHandle<()>> = self
            .workers
            .drain()
            .map(|(_, worker)| {
                let _ = worker.control.send(TransferControl::Pause);
                worker.handle
            })
            .collect();
        if tokio::time::timeout(SHUTDOWN_GRACE, join_all(handles))
            .await
            .is_err()
        {
            warn!("[SCHEDULER] Transfers did not stop within {:?}", SHUTDOWN_GRACE);
        }
    }
}

/// Remove leftover files off the scheduler loop, then report back.
fn spawn_cleanup(
    updates: mpsc::UnboundedSender<JobUpdate>,
    id: ResourceId,
    partial: Option<PathBuf>,
    finished: Option<PathBuf>,
) {
    tokio::spawn(async move {
        for path in partial.into_iter().chain(finished) {
            if let Err(err) = remove_file_if_exists(&path).await {
                warn!("Failed to remove {:?}: {}", path, err);
            }
        }
        let _ = updates.send(JobUpdate::Cleaned { id });
    });
}

fn new_entry(resource: Resource, arrival: u64) -> JobEntry {
    JobEntry {
        job: DownloadJob::new(resource),
        arrival,
        source_url: None,
        cancel_waiters: Vec::new(),
    }
}

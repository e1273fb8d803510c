//! Resource Sync - Core Library
//!
//! Keeps a local work directory in step with a weekly resource manifest:
//! periodic polling, a download queue with pause/resume/cancel, category based
//! auto-download, retention of old files and an event stream for observers.

pub mod commands;
pub mod core;
pub mod utils;

// Re-export commonly used types
pub use core::{
    config::{AppConfig, ConfigStore},
    downloader::{HttpTransfer, Transfer},
    events::{DownloadEvent, EventBus},
    models::{
        AppError, AppResult, AppStatus, DownloadJob, DownloadMode, JobStatus, Resource,
        ResourceSummary, WeekIdentifier,
    },
    poller::{HttpManifestSource, ManifestSource, Poller},
    scheduler::{SchedulerHandle, StartOutcome},
};

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::core::downloader::DownloaderConfig;
use crate::core::policy::AutoDownloadPolicy;
use crate::core::retention::{RetentionSweeper, RETENTION_SWEEP_INTERVAL};
use crate::core::scheduler::spawn_scheduler;
use crate::core::summary::SummaryProjector;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Application state shared by every command
#[derive(Clone)]
pub struct AppState {
    pub config: ConfigStore,
    pub events: EventBus,
    pub scheduler: SchedulerHandle,
    pub poller: Poller,
    pub retention: RetentionSweeper,
    pub transfer: Arc<dyn Transfer>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Load the persisted configuration and wire up the HTTP-backed services.
    /// Must be called from within a tokio runtime.
    pub fn new() -> anyhow::Result<Self> {
        let path = AppConfig::get_config_path()?;
        let config = ConfigStore::load_or_default(path);

        let transfer = HttpTransfer::new(DownloaderConfig::default())
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP transfer: {}", e))?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(format!("{}/{}", NAME, VERSION))
            .build()?;
        let source = HttpManifestSource::new(client, config.clone());

        Ok(Self::with_parts(config, Arc::new(transfer), Arc::new(source)))
    }

    /// Assemble the engine from its collaborators and spawn its background tasks.
    pub fn with_parts(
        config: ConfigStore,
        transfer: Arc<dyn Transfer>,
        source: Arc<dyn ManifestSource>,
    ) -> Self {
        let events = EventBus::new();
        let (scheduler, scheduler_task) =
            spawn_scheduler(transfer.clone(), config.clone(), events.clone());

        let policy = AutoDownloadPolicy::new(config.clone(), scheduler.clone());
        let poller = Poller::new(source, config.clone(), events.clone(), Some(policy));

        let retention = RetentionSweeper::new(config.clone(), scheduler.clone(), events.clone());
        let retention_task = retention.clone().spawn(RETENTION_SWEEP_INTERVAL);

        let summary_task = SummaryProjector::new(
            poller.watch_resources(),
            scheduler.watch_jobs(),
            config.clone(),
            events.clone(),
        )
        .spawn();

        Self {
            config,
            events,
            scheduler,
            poller,
            retention,
            transfer,
            tasks: Arc::new(Mutex::new(vec![
                scheduler_task,
                retention_task,
                summary_task,
            ])),
        }
    }

    /// Restore the cached list and start the poll timer when enabled.
    pub async fn start(&self) {
        if let Err(err) = self.poller.load_cache().await {
            tracing::warn!("Ignoring unreadable resource cache: {}", err);
        }
        if self.config.read(|c| c.polling_enabled) {
            self.poller.start_polling();
        }
    }

    /// Stop polling, pause running transfers and tear down background tasks.
    pub async fn shutdown(&self) {
        self.poller.stop_polling();
        if let Err(err) = self.scheduler.shutdown().await {
            tracing::warn!("Scheduler shutdown failed: {}", err);
        }
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        tracing::info!("🛑 {} stopped", NAME);
    }
}

/// Initialize logging for the library
pub fn init() {
    utils::logging::init_tracing();
    tracing::info!("{} v{} initialized", NAME, VERSION);
}

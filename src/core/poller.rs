//! Resource poller
//!
//! Fetches the weekly manifest on a timer and on demand. A poll that fails
//! leaves the known list alone; a successful one replaces it in one step,
//! reports the change and hands new arrivals to the auto-download policy.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use reqwest::Client;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::core::config::ConfigStore;
use crate::core::events::{DownloadEvent, EventBus};
use crate::core::layout::DownloadLayout;
use crate::core::models::{
    AppError, AppResult, AppStatus, Resource, ResourceId, ResourceListResponse, WeekIdentifier,
};
use crate::core::policy::AutoDownloadPolicy;

pub const LATEST_WEEK_PATH: &str = "/api/resources/latest-week";

/// Where manifests come from
#[async_trait]
pub trait ManifestSource: Send + Sync {
    async fn fetch_latest(&self) -> AppResult<ResourceListResponse>;
}

/// Manifest endpoint of the remote API
#[derive(Debug, Clone)]
pub struct HttpManifestSource {
    client: Client,
    config: ConfigStore,
}

impl HttpManifestSource {
    pub fn new(client: Client, config: ConfigStore) -> Self {
        Self { client, config }
    }

    fn endpoint(&self) -> String {
        let base = self.config.read(|c| c.api_base_url.clone());
        format!("{}{}", base.trim_end_matches('/'), LATEST_WEEK_PATH)
    }
}

#[async_trait]
impl ManifestSource for HttpManifestSource {
    async fn fetch_latest(&self) -> AppResult<ResourceListResponse> {
        let url = self.endpoint();
        debug!("Fetching manifest from {}", url);

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Poll(format!("{} returned HTTP {}", url, status)));
        }

        let body = response.text().await?;
        let manifest: ResourceListResponse = serde_json::from_str(&body)?;
        Ok(manifest)
    }
}

#[derive(Debug, Default)]
struct PollState {
    last_poll_time: Option<chrono::DateTime<Utc>>,
    current_week: Option<WeekIdentifier>,
}

/// Result of the most recent finished poll, shared with callers that waited on it
#[derive(Debug, Default)]
struct LastPoll {
    generation: u64,
    result: Option<Result<ResourceListResponse, String>>,
}

struct PollerInner {
    source: Arc<dyn ManifestSource>,
    config: ConfigStore,
    events: EventBus,
    policy: Option<AutoDownloadPolicy>,
    resources: watch::Sender<Arc<Vec<Resource>>>,
    state: RwLock<PollState>,
    in_flight: tokio::sync::Mutex<()>,
    last: Mutex<LastPoll>,
    timer: Mutex<Option<JoinHandle<()>>>,
}

/// Cloneable handle to the polling service.
#[derive(Clone)]
pub struct Poller {
    inner: Arc<PollerInner>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("polling_active", &self.is_polling())
            .finish()
    }
}

impl Poller {
    pub fn new(
        source: Arc<dyn ManifestSource>,
        config: ConfigStore,
        events: EventBus,
        policy: Option<AutoDownloadPolicy>,
    ) -> Self {
        let (resources, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            inner: Arc::new(PollerInner {
                source,
                config,
                events,
                policy,
                resources,
                state: RwLock::new(PollState::default()),
                in_flight: tokio::sync::Mutex::new(()),
                last: Mutex::new(LastPoll::default()),
                timer: Mutex::new(None),
            }),
        }
    }

    pub fn resources(&self) -> Arc<Vec<Resource>> {
        self.inner.resources.borrow().clone()
    }

    pub fn watch_resources(&self) -> watch::Receiver<Arc<Vec<Resource>>> {
        self.inner.resources.subscribe()
    }

    pub fn status(&self) -> AppStatus {
        let state = self.inner.state.read();
        AppStatus {
            polling_active: self.is_polling(),
            last_poll_time: state.last_poll_time,
            current_week: state.current_week,
            total_resources: self.inner.resources.borrow().len(),
        }
    }

    pub fn is_polling(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Poll now. If a poll is already running, wait for it and return its result.
    pub async fn poll_now(&self) -> AppResult<ResourceListResponse> {
        let seen = self.inner.last.lock().generation;
        let _flight = self.inner.in_flight.lock().await;

        {
            let last = self.inner.last.lock();
            if last.generation > seen {
                if let Some(result) = &last.result {
                    debug!("Joined in-flight poll");
                    return result.clone().map_err(AppError::Poll);
                }
            }
        }

        let result = self.poll_once().await;
        let mut last = self.inner.last.lock();
        last.generation += 1;
        last.result = Some(result.as_ref().map(Clone::clone).map_err(|e| e.to_string()));
        result
    }

    async fn poll_once(&self) -> AppResult<ResourceListResponse> {
        let inner = &self.inner;
        let manifest = match inner.source.fetch_latest().await {
            Ok(manifest) => manifest,
            Err(err) => {
                error!("Polling failed ({:?}): {}", err.category(), err);
                inner.events.emit(DownloadEvent::PollError {
                    message: err.to_string(),
                });
                return Err(err);
            }
        };

        let added = self.replace_resources(&manifest.resources);
        {
            let mut state = inner.state.write();
            state.last_poll_time = Some(Utc::now());
            if let Some(newest) = manifest.resources.iter().max_by_key(|r| r.created_at) {
                state.current_week = Some(newest.week());
            }
        }

        inner.events.emit(DownloadEvent::ResourcesUpdated {
            resources: manifest.resources.clone(),
        });
        inner.events.emit(DownloadEvent::PollTick);
        info!(
            "Poll completed: {} resources fetched, {} new",
            manifest.resources.len(),
            added.len()
        );

        self.write_cache(&manifest).await;

        if let Some(policy) = &inner.policy {
            for superseded in policy.on_errata(&manifest.resources).await {
                inner.events.emit(DownloadEvent::ErrataDetected {
                    id: superseded.id,
                    superseded_path: superseded.archived_path,
                });
            }
            policy.on_discovered(&added).await;
        }

        Ok(manifest)
    }

    /// Swap in the new list and return the resources that were not known before.
    fn replace_resources(&self, resources: &[Resource]) -> Vec<Resource> {
        let known: HashSet<ResourceId> = self
            .inner
            .resources
            .borrow()
            .iter()
            .map(|r| r.id)
            .collect();
        let added = resources
            .iter()
            .filter(|r| !known.contains(&r.id))
            .cloned()
            .collect();
        self.inner
            .resources
            .send_replace(Arc::new(resources.to_vec()));
        added
    }

    async fn write_cache(&self, manifest: &ResourceListResponse) {
        let Some(work_dir) = self.inner.config.read(|c| c.work_directory.clone()) else {
            return;
        };
        let path = DownloadLayout::new(work_dir).cache_path();
        let result = match serde_json::to_vec_pretty(manifest) {
            Ok(bytes) => tokio::fs::write(&path, bytes).await.map_err(AppError::from),
            Err(err) => Err(AppError::from(err)),
        };
        if let Err(err) = result {
            warn!("Failed to write resource cache {:?}: {}", path, err);
        }
    }

    /// Seed the list from the last cached manifest. Returns the number of resources loaded.
    pub async fn load_cache(&self) -> AppResult<usize> {
        let Some(work_dir) = self.inner.config.read(|c| c.work_directory.clone()) else {
            return Ok(0);
        };
        let path = DownloadLayout::new(work_dir).cache_path();
        if !path.is_file() {
            return Ok(0);
        }

        let bytes = tokio::fs::read(&path).await?;
        let manifest: ResourceListResponse = serde_json::from_slice(&bytes)?;
        let count = manifest.resources.len();
        self.replace_resources(&manifest.resources);
        if let Some(newest) = manifest.resources.iter().max_by_key(|r| r.created_at) {
            self.inner.state.write().current_week = Some(newest.week());
        }
        info!("Loaded {} cached resources from {:?}", count, path);
        Ok(count)
    }

    /// Start the periodic timer using the configured interval. The first tick
    /// fires one full interval from now.
    pub fn start_polling(&self) {
        let minutes = self.inner.config.read(|c| c.polling_interval_minutes);
        self.start_polling_every(Duration::from_secs(u64::from(minutes) * 60));
    }

    pub fn start_polling_every(&self, period: Duration) {
        let mut timer = self.inner.timer.lock();
        if let Some(handle) = timer.take() {
            handle.abort();
        }

        let poller = self.clone();
        *timer = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!("Polling service started with interval {:?}", period);
            loop {
                ticker.tick().await;
                debug!("Polling tick");
                // Failures are already reported as poll-error events.
                let _ = poller.poll_now().await;
            }
        }));
    }

    pub fn stop_polling(&self) {
        if let Some(handle) = self.inner.timer.lock().take() {
            handle.abort();
            info!("Polling service stopped");
        }
    }

    /// Restart the timer with the current interval if it is running.
    pub fn restart_polling(&self) {
        if self.is_polling() {
            self.start_polling();
        }
    }
}

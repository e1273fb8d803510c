//! In-memory doubles shared by the unit tests

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;

use crate::core::downloader::{
    ProgressFn, StopReason, Transfer, TransferControl, TransferOutcome, TransferRequest,
};
use crate::core::error_handling::DownloadError;
use crate::core::models::{AppError, AppResult, Resource, ResourceListResponse};
use crate::core::poller::ManifestSource;

pub fn resource(id: i64, category: &str, url: &str) -> Resource {
    Resource {
        id,
        category: category.to_string(),
        title: format!("Resource {}", id),
        description: String::new(),
        download_url: url.to_string(),
        optimized_url: None,
        thumbnail_url: None,
        file_type: None,
        checksum: None,
        created_at: Utc.with_ymd_and_hms(2026, 1, 14, 9, 0, 0).unwrap(),
    }
}

/// Poll `condition` every few milliseconds, panicking after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached within 5s");
}

/// Serves bodies from memory in fixed-size chunks.
///
/// `hold()` parks every transfer before its next chunk (or, with `hold_after`,
/// once it has written that many bytes) until `release()`. A parked transfer
/// still reacts to pause and cancel.
pub struct MemoryTransfer {
    bodies: Mutex<HashMap<String, Vec<u8>>>,
    chunk_size: AtomicUsize,
    hold_after: AtomicU64,
    gate: watch::Sender<bool>,
    fetches: AtomicUsize,
    offsets: Mutex<HashMap<String, Vec<u64>>>,
    positions: Mutex<HashMap<String, u64>>,
}

impl MemoryTransfer {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            bodies: Mutex::new(HashMap::new()),
            chunk_size: AtomicUsize::new(1024),
            hold_after: AtomicU64::new(0),
            gate,
            fetches: AtomicUsize::new(0),
            offsets: Mutex::new(HashMap::new()),
            positions: Mutex::new(HashMap::new()),
        }
    }

    pub fn add(&self, url: &str, body: Vec<u8>) {
        self.bodies.lock().insert(url.to_string(), body);
    }

    pub fn set_chunk_size(&self, size: usize) {
        self.chunk_size.store(size.max(1), Ordering::SeqCst);
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn hold_after(&self, bytes: u64) {
        self.hold_after.store(bytes, Ordering::SeqCst);
        self.hold();
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Start offsets of every fetch of `url`, in order.
    pub fn offsets(&self, url: &str) -> Vec<u64> {
        self.offsets.lock().get(url).cloned().unwrap_or_default()
    }

    /// Bytes of `url` written so far by the latest fetch.
    pub fn bytes_sent(&self, url: &str) -> u64 {
        self.positions.lock().get(url).copied().unwrap_or(0)
    }

    async fn wait_for_gate(
        &self,
        written: u64,
        control: &mut watch::Receiver<TransferControl>,
    ) -> Option<StopReason> {
        let mut gate = self.gate.subscribe();
        loop {
            if *gate.borrow_and_update() || written < self.hold_after.load(Ordering::SeqCst) {
                return None;
            }
            tokio::select! {
                _ = gate.changed() => {}
                changed = control.changed() => {
                    let reason = match changed {
                        Ok(()) => control.borrow().stop_reason(),
                        Err(_) => Some(StopReason::Cancelled),
                    };
                    if reason.is_some() {
                        return reason;
                    }
                }
            }
        }
    }
}

impl Default for MemoryTransfer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transfer for MemoryTransfer {
    async fn fetch(
        &self,
        request: &TransferRequest,
        control: &mut watch::Receiver<TransferControl>,
        on_progress: ProgressFn<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.offsets
            .lock()
            .entry(request.url.clone())
            .or_default()
            .push(request.offset);

        let body = self.bodies.lock().get(&request.url).cloned().ok_or_else(|| {
            DownloadError::HttpStatus {
                status: 404,
                url: request.url.clone(),
            }
        })?;
        let total = body.len() as u64;

        let on_disk = tokio::fs::metadata(&request.partial_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        let mut written = request.offset.min(on_disk).min(total);

        if let Some(parent) = request.partial_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::filesystem(&e, parent))?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&request.partial_path)
            .await
            .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
        file.set_len(written)
            .await
            .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
        let mut file = tokio::io::BufWriter::new(file);
        {
            use tokio::io::AsyncSeekExt;
            file.seek(std::io::SeekFrom::Start(written))
                .await
                .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
        }

        self.positions.lock().insert(request.url.clone(), written);
        on_progress(written, total);

        let stopped = |reason, bytes| TransferOutcome::Stopped {
            reason,
            bytes,
            total,
        };

        while written < total {
            let requested = control.borrow().stop_reason();
            let requested = match requested {
                Some(reason) => Some(reason),
                None => self.wait_for_gate(written, control).await,
            };
            if let Some(reason) = requested {
                file.flush()
                    .await
                    .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
                return Ok(stopped(reason, written));
            }

            let end = (written as usize + self.chunk_size.load(Ordering::SeqCst)).min(body.len());
            file.write_all(&body[written as usize..end])
                .await
                .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
            file.flush()
                .await
                .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
            written = end as u64;
            self.positions.lock().insert(request.url.clone(), written);
            on_progress(written, total);
            tokio::task::yield_now().await;
        }

        Ok(TransferOutcome::Finished {
            bytes: written,
            total,
        })
    }

    async fn content_length(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        Ok(self.bodies.lock().get(url).map(|body| body.len() as u64))
    }
}

/// Manifest source that replays queued results, one per fetch.
pub struct ScriptedManifest {
    script: Mutex<VecDeque<AppResult<ResourceListResponse>>>,
    calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl ScriptedManifest {
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            gate,
        }
    }

    pub fn push_ok(&self, manifest: ResourceListResponse) {
        self.script.lock().push_back(Ok(manifest));
    }

    pub fn push_err(&self, message: &str) {
        self.script
            .lock()
            .push_back(Err(AppError::Poll(message.to_string())));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }
}

impl Default for ScriptedManifest {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ManifestSource for ScriptedManifest {
    async fn fetch_latest(&self) -> AppResult<ResourceListResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut gate = self.gate.subscribe();
        while !*gate.borrow_and_update() {
            if gate.changed().await.is_err() {
                break;
            }
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Poll("script exhausted".into())))
    }
}

/// Engine wired to in-memory doubles, polling disabled, work directory set to a fresh temp dir.
pub fn test_state() -> (
    crate::AppState,
    std::sync::Arc<MemoryTransfer>,
    std::sync::Arc<ScriptedManifest>,
    tempfile::TempDir,
) {
    let dir = tempfile::tempdir().unwrap();
    let config = crate::core::config::ConfigStore::in_memory(crate::core::config::AppConfig {
        work_directory: Some(dir.path().to_path_buf()),
        polling_enabled: false,
        ..Default::default()
    });
    let transfer = std::sync::Arc::new(MemoryTransfer::new());
    let source = std::sync::Arc::new(ScriptedManifest::new());
    let state = crate::AppState::with_parts(config, transfer.clone(), source.clone());
    (state, transfer, source, dir)
}

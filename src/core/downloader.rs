//! Resumable HTTP transfer primitive
//!
//! Streams a URL into a partial file starting at an optional byte offset. The
//! caller steers a running transfer through a `watch` channel; pause and cancel
//! are observed between chunks and while waiting for the next one, so a stop
//! request never waits longer than one chunk of I/O.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::{Client, StatusCode};
use std::path::PathBuf;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::core::error_handling::DownloadError;

/// Signal sent from the scheduler to a running transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferControl {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Paused,
    Cancelled,
}

impl TransferControl {
    pub(crate) fn stop_reason(self) -> Option<StopReason> {
        match self {
            TransferControl::Run => None,
            TransferControl::Pause => Some(StopReason::Paused),
            TransferControl::Cancel => Some(StopReason::Cancelled),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub url: String,
    pub partial_path: PathBuf,
    /// Bytes already present in `partial_path`
    pub offset: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Body fully written to the partial file
    Finished { bytes: u64, total: u64 },
    /// Stopped on request; the partial file holds `bytes` bytes
    Stopped {
        reason: StopReason,
        bytes: u64,
        total: u64,
    },
}

/// Progress callback: `(current_bytes, total_bytes)`, total is 0 when unknown.
pub type ProgressFn<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

#[async_trait]
pub trait Transfer: Send + Sync {
    async fn fetch(
        &self,
        request: &TransferRequest,
        control: &mut watch::Receiver<TransferControl>,
        on_progress: ProgressFn<'_>,
    ) -> Result<TransferOutcome, DownloadError>;

    /// Remote size from a HEAD request, if the server reports one
    async fn content_length(&self, url: &str) -> Result<Option<u64>, DownloadError>;
}

/// Downloader configuration
#[derive(Debug, Clone)]
pub struct DownloaderConfig {
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            user_agent: format!("{}/{}", crate::NAME, crate::VERSION),
        }
    }
}

/// reqwest-backed transfer
#[derive(Debug, Clone)]
pub struct HttpTransfer {
    client: Client,
}

impl HttpTransfer {
    pub fn new(config: DownloaderConfig) -> Result<Self, DownloadError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .build()?;
        Ok(Self { client })
    }

    async fn open_partial(
        &self,
        request: &TransferRequest,
        resume_at: Option<u64>,
    ) -> Result<File, DownloadError> {
        let path = &request.partial_path;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::filesystem(&e, parent))?;
        }
        match resume_at {
            Some(offset) => {
                let file = OpenOptions::new()
                    .append(true)
                    .open(path)
                    .await
                    .map_err(|e| DownloadError::filesystem(&e, path))?;
                // Drop anything written past the recorded offset.
                file.set_len(offset)
                    .await
                    .map_err(|e| DownloadError::filesystem(&e, path))?;
                Ok(file)
            }
            None => File::create(path)
                .await
                .map_err(|e| DownloadError::filesystem(&e, path)),
        }
    }
}

async fn finish_file(file: &mut File, request: &TransferRequest) -> Result<(), DownloadError> {
    file.flush()
        .await
        .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
    file.sync_all()
        .await
        .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))
}

#[async_trait]
impl Transfer for HttpTransfer {
    async fn fetch(
        &self,
        request: &TransferRequest,
        control: &mut watch::Receiver<TransferControl>,
        on_progress: ProgressFn<'_>,
    ) -> Result<TransferOutcome, DownloadError> {
        // The file on disk is the ground truth for how much was already written.
        let on_disk = match tokio::fs::metadata(&request.partial_path).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        let mut offset = request.offset.min(on_disk);

        let requested = control.borrow().stop_reason();
        if let Some(reason) = requested {
            return Ok(TransferOutcome::Stopped {
                reason,
                bytes: offset,
                total: 0,
            });
        }

        let mut builder = self.client.get(&request.url);
        if offset > 0 {
            builder = builder.header(RANGE, format!("bytes={}-", offset));
            info!("Resuming {} from byte {}", request.url, offset);
        }

        let response = builder.send().await?;
        let status = response.status();

        if status == StatusCode::RANGE_NOT_SATISFIABLE && offset > 0 {
            debug!("Range past end of {}, partial file already complete", request.url);
            return Ok(TransferOutcome::Finished {
                bytes: offset,
                total: offset,
            });
        }

        if !status.is_success() {
            return Err(DownloadError::HttpStatus {
                status: status.as_u16(),
                url: request.url.clone(),
            });
        }

        let resumed = offset > 0 && status == StatusCode::PARTIAL_CONTENT;
        if offset > 0 && !resumed {
            warn!(
                "Server ignored range request for {}, restarting from zero",
                request.url
            );
            offset = 0;
        }

        let total = response
            .content_length()
            .map(|len| len + offset)
            .unwrap_or(0);

        let mut file = self
            .open_partial(request, resumed.then_some(offset))
            .await?;
        let mut stream = response.bytes_stream();
        let mut written = offset;
        on_progress(written, total);

        loop {
            tokio::select! {
                biased;
                changed = control.changed() => {
                    let reason = match changed {
                        Ok(()) => control.borrow().stop_reason(),
                        // Controller gone: nobody will ever resume this transfer.
                        Err(_) => Some(StopReason::Cancelled),
                    };
                    if let Some(reason) = reason {
                        finish_file(&mut file, request).await?;
                        return Ok(TransferOutcome::Stopped { reason, bytes: written, total });
                    }
                }
                chunk = stream.next() => {
                    let Some(chunk) = chunk else { break };
                    let chunk = chunk?;
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| DownloadError::filesystem(&e, &request.partial_path))?;
                    written += chunk.len() as u64;
                    on_progress(written, total);

                    let requested = control.borrow().stop_reason();
                    if let Some(reason) = requested {
                        finish_file(&mut file, request).await?;
                        return Ok(TransferOutcome::Stopped { reason, bytes: written, total });
                    }
                }
            }
        }

        finish_file(&mut file, request).await?;

        if total > 0 && written != total {
            return Err(DownloadError::Network {
                message: format!(
                    "Connection closed after {} of {} bytes",
                    written, total
                ),
            });
        }

        info!("Transfer finished: {} ({} bytes)", request.url, written);
        Ok(TransferOutcome::Finished {
            bytes: written,
            total: if total == 0 { written } else { total },
        })
    }

    async fn content_length(&self, url: &str) -> Result<Option<u64>, DownloadError> {
        let response = self.client.head(url).send().await?;

        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                status: response.status().as_u16(),
                url: url.to_string(),
            });
        }

        Ok(response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    fn transfer() -> HttpTransfer {
        HttpTransfer::new(DownloaderConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_fresh_download_writes_partial() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/bulletin.pdf");
            then.status(200).body("hello world");
        });

        let dir = tempfile::tempdir().unwrap();
        let request = TransferRequest {
            url: server.url("/bulletin.pdf"),
            partial_path: dir.path().join("bulletin.pdf.part"),
            offset: 0,
        };
        let (_tx, mut rx) = watch::channel(TransferControl::Run);
        let last = Arc::new(AtomicU64::new(0));
        let seen = last.clone();

        let outcome = transfer()
            .fetch(&request, &mut rx, &move |current, _| {
                seen.store(current, Ordering::SeqCst);
            })
            .await
            .unwrap();

        mock.assert();
        assert_eq!(
            outcome,
            TransferOutcome::Finished {
                bytes: 11,
                total: 11
            }
        );
        assert_eq!(last.load(Ordering::SeqCst), 11);
        assert_eq!(
            std::fs::read_to_string(&request.partial_path).unwrap(),
            "hello world"
        );
    }

    #[tokio::test]
    async fn test_resume_appends_with_range_header() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/bulletin.pdf")
                .header("range", "bytes=6-");
            then.status(206).body("world");
        });

        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("bulletin.pdf.part");
        std::fs::write(&partial, "hello ").unwrap();
        let request = TransferRequest {
            url: server.url("/bulletin.pdf"),
            partial_path: partial.clone(),
            offset: 6,
        };
        let (_tx, mut rx) = watch::channel(TransferControl::Run);

        let outcome = transfer().fetch(&request, &mut rx, &|_, _| {}).await.unwrap();

        mock.assert();
        assert_eq!(
            outcome,
            TransferOutcome::Finished {
                bytes: 11,
                total: 11
            }
        );
        assert_eq!(std::fs::read_to_string(&partial).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_server_without_range_support_restarts() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/bulletin.pdf");
            then.status(200).body("hello world");
        });

        let dir = tempfile::tempdir().unwrap();
        let partial = dir.path().join("bulletin.pdf.part");
        std::fs::write(&partial, "hello ").unwrap();
        let request = TransferRequest {
            url: server.url("/bulletin.pdf"),
            partial_path: partial.clone(),
            offset: 6,
        };
        let (_tx, mut rx) = watch::channel(TransferControl::Run);

        transfer().fetch(&request, &mut rx, &|_, _| {}).await.unwrap();
        assert_eq!(std::fs::read_to_string(&partial).unwrap(), "hello world");
    }

    #[tokio::test]
    async fn test_http_error_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/missing.pdf");
            then.status(404);
        });

        let dir = tempfile::tempdir().unwrap();
        let request = TransferRequest {
            url: server.url("/missing.pdf"),
            partial_path: dir.path().join("missing.pdf.part"),
            offset: 0,
        };
        let (_tx, mut rx) = watch::channel(TransferControl::Run);

        let err = transfer()
            .fetch(&request, &mut rx, &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_stop_requested_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let request = TransferRequest {
            url: "http://127.0.0.1:9/never".into(),
            partial_path: dir.path().join("never.part"),
            offset: 0,
        };
        let (_tx, mut rx) = watch::channel(TransferControl::Pause);

        let outcome = transfer().fetch(&request, &mut rx, &|_, _| {}).await.unwrap();
        assert_eq!(
            outcome,
            TransferOutcome::Stopped {
                reason: StopReason::Paused,
                bytes: 0,
                total: 0
            }
        );
    }

    #[tokio::test]
    async fn test_content_length_from_head() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(httpmock::Method::HEAD).path("/bulletin.pdf");
            then.status(200).header("content-length", "2048");
        });

        let size = transfer()
            .content_length(&server.url("/bulletin.pdf"))
            .await
            .unwrap();
        assert_eq!(size, Some(2048));
    }
}

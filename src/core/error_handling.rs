//! Error taxonomy and bounded retry
//!
//! Transfer failures are classified into categories so the scheduler can decide
//! what a failure means for a job. Retries here are deliberately narrow: only
//! transient contention on the command path is retried automatically. Network
//! failures wait for the next natural opportunity (the next poll or a user retry).

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::core::models::{AppError, AppResult};

/// Attempts made by pause/cancel callers before giving up on contention
pub const CONTENTION_RETRY_ATTEMPTS: u32 = 3;

/// Fixed delay between contention retries
pub const CONTENTION_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Error categories for the download system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Connection, DNS, timeout and HTTP status failures
    Network,
    /// Permissions, disk space and other IO failures
    FileSystem,
    /// Checksum mismatch after completion
    DataIntegrity,
    /// Invalid settings
    Configuration,
    /// Command path temporarily saturated
    LockContention,
}

/// Failure of a single transfer
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
pub enum DownloadError {
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("HTTP status {status} for {url}")]
    HttpStatus { status: u16, url: String },

    #[error("File system error: {message}")]
    FileSystem {
        message: String,
        path: Option<String>,
    },

    #[error("Integrity mismatch: expected {expected}, computed {actual}")]
    IntegrityMismatch { expected: String, actual: String },
}

impl DownloadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Network { .. } | Self::HttpStatus { .. } => ErrorCategory::Network,
            Self::FileSystem { .. } => ErrorCategory::FileSystem,
            Self::IntegrityMismatch { .. } => ErrorCategory::DataIntegrity,
        }
    }

    pub fn filesystem(err: &std::io::Error, path: &std::path::Path) -> Self {
        Self::FileSystem {
            message: err.to_string(),
            path: Some(path.display().to_string()),
        }
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => Self::HttpStatus {
                status: status.as_u16(),
                url: err
                    .url()
                    .map(|u| u.to_string())
                    .unwrap_or_default(),
            },
            None => Self::Network {
                message: err.to_string(),
            },
        }
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        Self::FileSystem {
            message: err.to_string(),
            path: None,
        }
    }
}

impl AppError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            AppError::Network(_) | AppError::Poll(_) => ErrorCategory::Network,
            AppError::Io(_) => ErrorCategory::FileSystem,
            AppError::Download(err) => err.category(),
            AppError::Config(_) | AppError::WorkDirectoryNotSet => ErrorCategory::Configuration,
            AppError::LockContention(_) => ErrorCategory::LockContention,
            AppError::Parse(_)
            | AppError::JobNotFound(_)
            | AppError::InvalidState { .. }
            | AppError::System(_) => ErrorCategory::Configuration,
        }
    }
}

/// Retry policy configuration
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: CONTENTION_RETRY_ATTEMPTS,
            delay: CONTENTION_RETRY_DELAY,
        }
    }
}

/// Runs an operation, retrying only transient failures with a fixed delay.
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    pub async fn execute<T, F, Fut>(&self, label: &str, mut f: F) -> AppResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = AppResult<T>>,
    {
        let attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() && attempt < attempts => {
                    debug!(
                        "{} hit transient contention (attempt {}/{}): {}",
                        label, attempt, attempts, err
                    );
                    attempt += 1;
                    sleep(self.policy.delay).await;
                }
                Err(err) => {
                    if err.is_transient() {
                        warn!("{} gave up after {} attempts: {}", label, attempts, err);
                    }
                    return Err(err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_executor() -> RetryExecutor {
        RetryExecutor::new(RetryPolicy {
            max_attempts: 3,
            delay: Duration::from_millis(1),
        })
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = fast_executor()
            .execute("pause", move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AppError::LockContention("busy".into()))
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_bounded_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: AppResult<()> = fast_executor()
            .execute("cancel", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::LockContention("busy".into()))
                }
            })
            .await;
        assert!(matches!(result, Err(AppError::LockContention(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result: AppResult<()> = fast_executor()
            .execute("pause", move || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err(AppError::JobNotFound(9))
                }
            })
            .await;
        assert!(matches!(result, Err(AppError::JobNotFound(9))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_categories() {
        let err = DownloadError::HttpStatus {
            status: 503,
            url: "https://x".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Network);
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        assert_eq!(
            DownloadError::from(io).category(),
            ErrorCategory::FileSystem
        );
        assert_eq!(
            AppError::LockContention("x".into()).category(),
            ErrorCategory::LockContention
        );
    }
}

//! Core data models for the resource sync engine

use chrono::{DateTime, Datelike, IsoWeek, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::path::PathBuf;

use crate::core::config::ConfigValidationError;
use crate::core::error_handling::DownloadError;
use crate::utils::validation::is_shortcut_url;

/// Identity of a remote resource.
pub type ResourceId = i64;

/// Resource published by the remote manifest

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Resource {
    pub id: ResourceId,

    pub category: String,

    pub title: String,

    #[serde(default)]
    pub description: String,

    pub download_url: String,

    #[serde(default)]
    pub optimized_url: Option<String>,

    #[serde(default)]
    pub thumbnail_url: Option<String>,

    #[serde(default)]
    pub file_type: Option<String>,

    #[serde(default)]
    pub checksum: Option<String>,

    #[serde(deserialize_with = "deserialize_flexible_datetime")]
    pub created_at: DateTime<Utc>,
}

fn deserialize_flexible_datetime<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw: String = Deserialize::deserialize(deserializer)?;
    parse_flexible_datetime(&raw).ok_or_else(|| {
        serde::de::Error::custom(format!("Failed to parse datetime: {}", raw))
    })
}

/// Accepts RFC 3339 or a naive ISO-8601 timestamp, which is taken as UTC.
pub fn parse_flexible_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    raw.parse::<NaiveDateTime>().ok().map(|naive| naive.and_utc())
}

impl Resource {
    /// Links to video platforms are stored as shortcut files, not downloaded.
    pub fn is_shortcut(&self) -> bool {
        is_shortcut_url(&self.download_url)
    }

    pub fn week(&self) -> WeekIdentifier {
        WeekIdentifier::from_datetime(self.created_at)
    }

    /// URL to fetch, honouring the optimized variant when preferred and present.
    pub fn source_url(&self, prefer_optimized: bool) -> &str {
        match (&self.optimized_url, prefer_optimized) {
            (Some(optimized), true) if !optimized.trim().is_empty() => optimized,
            _ => &self.download_url,
        }
    }
}

/// Manifest payload returned by the remote API

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceListResponse {
    pub count: u32,

    pub resources: Vec<Resource>,
}

/// ISO week a resource was published in

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WeekIdentifier {
    pub year: i32,

    pub week_number: u32,
}

impl WeekIdentifier {
    pub fn new(year: i32, week_number: u32) -> Self {
        Self { year, week_number }
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let iso_week: IsoWeek = dt.iso_week();
        Self {
            year: iso_week.year(),
            week_number: iso_week.week(),
        }
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Directory name such as `2026-W03`.
    pub fn as_dir_name(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for WeekIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-W{:02}", self.year, self.week_number)
    }
}

/// Job status enumeration

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,

    Downloading,

    Paused,

    Completed,

    Error,

    /// Transient: shown only while partial-file cleanup runs, then the job is removed.
    Cancelled,
}

/// Result of checksum verification

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Integrity {
    #[default]
    Unknown,

    Verified,

    Mismatch,
}

/// Download concurrency mode

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum DownloadMode {
    /// One transfer at a time
    #[default]
    Queue,

    /// Up to four transfers at once
    Parallel,
}

impl DownloadMode {
    pub fn concurrency(&self) -> usize {
        match self {
            DownloadMode::Queue => 1,
            DownloadMode::Parallel => 4,
        }
    }
}

/// Per-resource download job

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DownloadJob {
    pub resource_id: ResourceId,

    pub resource: Resource,

    pub status: JobStatus,

    /// 0..=100, never decreases while downloading
    pub progress: u8,

    pub current_bytes: u64,

    /// 0 while the size is unknown
    pub total_bytes: u64,

    /// 1-based rank among pending jobs, only set while pending
    pub queue_position: Option<usize>,

    pub retry_count: u32,

    pub error_message: Option<String>,

    pub integrity: Integrity,

    /// Resume offset recorded when the transfer stopped
    pub byte_offset: u64,

    /// Monotonic per-job state version; observers keep the highest they have seen
    pub version: u64,

    pub local_path: Option<PathBuf>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub completed_at: Option<DateTime<Utc>>,
}

/// Position of a pending job in the admission queue

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueuedEntry {
    pub id: ResourceId,

    pub position: usize,
}

/// Queue membership as observers see it

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueStatus {
    pub queued: Vec<QueuedEntry>,

    pub active: Vec<ResourceId>,
}

/// Application status for display

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppStatus {
    pub polling_active: bool,

    pub last_poll_time: Option<DateTime<Utc>>,

    pub current_week: Option<WeekIdentifier>,

    pub total_resources: usize,
}

/// Aggregate counters derived from the resource list and the job map

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSummary {
    pub total: usize,

    pub downloaded: usize,

    pub active: usize,

    pub queued: usize,
}

/// Application error types

#[derive(Debug, thiserror::Error)]

pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Parsing error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigValidationError),

    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    #[error("No download for resource {0}")]
    JobNotFound(ResourceId),

    #[error("Cannot {action} resource {id} while {status:?}")]
    InvalidState {
        id: ResourceId,
        action: &'static str,
        status: JobStatus,
    },

    #[error("Scheduler busy: {0}")]
    LockContention(String),

    #[error("Work directory not configured")]
    WorkDirectoryNotSet,

    #[error("Poll failed: {0}")]
    Poll(String),

    #[error("System error: {0}")]
    System(String),
}

impl AppError {
    /// Only contention on the command path is worth an immediate retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, AppError::LockContention(_))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Parse(err.to_string())
    }
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias for application operations

pub type AppResult<T> = Result<T, AppError>;

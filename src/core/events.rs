//! Event broadcasting
//!
//! Every observable change leaves the engine as one variant of [`DownloadEvent`].
//! Any number of observers can subscribe; an observer that falls behind loses the
//! oldest events (and is told how many) instead of slowing the engine down.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::trace;

use crate::core::models::{
    Integrity, QueueStatus, QueuedEntry, Resource, ResourceId, ResourceSummary,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum DownloadEvent {
    ResourcesUpdated {
        resources: Vec<Resource>,
    },
    PollError {
        message: String,
    },
    PollTick,
    DownloadProgress {
        id: ResourceId,
        progress: u8,
        current_bytes: u64,
        total_bytes: u64,
    },
    QueueStatusChanged {
        queued: Vec<QueuedEntry>,
        active: Vec<ResourceId>,
    },
    DownloadStarted {
        id: ResourceId,
    },
    DownloadComplete {
        id: ResourceId,
    },
    DownloadFailed {
        id: ResourceId,
        error: String,
    },
    DownloadPaused {
        id: ResourceId,
    },
    DownloadCancelled {
        id: ResourceId,
    },
    IntegrityChecked {
        id: ResourceId,
        integrity: Integrity,
    },
    SummaryUpdated {
        summary: ResourceSummary,
    },
    FilesPurged {
        count: usize,
    },
    /// A corrected version replaced the local copy, which was archived
    ErrataDetected {
        id: ResourceId,
        superseded_path: PathBuf,
    },
}

impl DownloadEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DownloadEvent::ResourcesUpdated { .. } => "resources-updated",
            DownloadEvent::PollError { .. } => "poll-error",
            DownloadEvent::PollTick => "poll-tick",
            DownloadEvent::DownloadProgress { .. } => "download-progress",
            DownloadEvent::QueueStatusChanged { .. } => "queue-status-changed",
            DownloadEvent::DownloadStarted { .. } => "download-started",
            DownloadEvent::DownloadComplete { .. } => "download-complete",
            DownloadEvent::DownloadFailed { .. } => "download-failed",
            DownloadEvent::DownloadPaused { .. } => "download-paused",
            DownloadEvent::DownloadCancelled { .. } => "download-cancelled",
            DownloadEvent::IntegrityChecked { .. } => "integrity-checked",
            DownloadEvent::SummaryUpdated { .. } => "summary-updated",
            DownloadEvent::FilesPurged { .. } => "files-purged",
            DownloadEvent::ErrataDetected { .. } => "errata-detected",
        }
    }

    pub fn queue_status(status: QueueStatus) -> Self {
        DownloadEvent::QueueStatusChanged {
            queued: status.queued,
            active: status.active,
        }
    }
}

/// Fan-out of engine events to observers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DownloadEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DownloadEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: DownloadEvent) {
        trace!("event {}", event.name());
        // No subscribers is fine: events are notifications, not state.
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

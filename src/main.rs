//! Headless resource sync runner
//!
//! Usage: `resource-sync [work-dir]`
//!
//! Loads the saved configuration, optionally overrides the work directory,
//! polls once, then keeps polling on the configured interval and logs every
//! engine event until Ctrl-C.

use std::env;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use resource_sync::commands;
use resource_sync::{AppState, DownloadEvent};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    resource_sync::init();

    let state = AppState::new()?;

    if let Some(work_dir) = env::args().nth(1) {
        commands::set_work_directory(&state, work_dir).await?;
    }
    if state.config.read(|c| c.work_directory.is_none()) {
        warn!("No work directory configured; downloads will fail until one is set");
    }

    state.start().await;

    let mut events = commands::subscribe(&state);
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!("Event log skipped {} events", skipped),
                Err(RecvError::Closed) => break,
            }
        }
    });

    match commands::force_poll(&state).await {
        Ok(response) => info!("📋 {} resources this week", response.count),
        Err(err) => error!("Initial poll failed: {}", err),
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received, shutting down");

    state.shutdown().await;
    logger.abort();
    Ok(())
}

fn log_event(event: &DownloadEvent) {
    match event {
        DownloadEvent::DownloadProgress {
            id,
            progress,
            current_bytes,
            total_bytes,
        } => tracing::debug!(
            "resource {}: {}% ({}/{} bytes)",
            id,
            progress,
            current_bytes,
            total_bytes
        ),
        DownloadEvent::DownloadFailed { id, error } => {
            warn!("resource {} failed: {}", id, error)
        }
        DownloadEvent::PollError { message } => warn!("poll failed: {}", message),
        DownloadEvent::ResourcesUpdated { resources } => {
            info!("resources-updated: {} resources", resources.len())
        }
        other => info!("{}: {}", other.name(), serde_json::to_string(other).unwrap_or_default()),
    }
}

//! Core business logic module
//!
//! Domain models, the download scheduler and its workers, the manifest poller
//! and the policies that act on what it finds.

pub mod config;
pub mod downloader;
pub mod errata;
pub mod error_handling;
pub mod events;
pub mod integrity_checker;
pub mod job;
pub mod layout;
pub mod models;
pub mod policy;
pub mod poller;
pub mod progress_tracker;
pub mod retention;
pub mod scheduler;
pub mod summary;

#[cfg(test)]
pub(crate) mod test_support;

// Re-export commonly used types
pub use config::{AppConfig, ConfigStore};
pub use scheduler::SchedulerHandle;

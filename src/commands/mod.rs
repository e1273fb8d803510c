//! Command handlers
//!
//! Every operation a front end can invoke. Handlers take the shared
//! [`AppState`](crate::AppState) and return [`AppResult`](crate::AppResult),
//! whose error serializes to its display string.

pub mod config;
pub mod download;
pub mod resources;

// Re-export all command functions for easy access
pub use config::*;
pub use download::*;
pub use resources::*;

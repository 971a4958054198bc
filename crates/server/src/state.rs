// crates/server/src/state.rs
//! Application state for the Axum server.

use crate::jobs::JobSystem;
use macroview_db::Database;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state accessible from all route handlers.
pub struct AppState {
    /// Server start time for uptime tracking.
    pub start_time: Instant,
    /// Database handle for job history queries.
    pub db: Database,
    /// The background job subsystem (registry + admission queue + runner).
    pub jobs: Arc<JobSystem>,
}

impl AppState {
    /// Create a new application state wrapped in an Arc for sharing.
    pub fn new(db: Database, jobs: Arc<JobSystem>) -> Arc<Self> {
        Arc::new(Self {
            start_time: Instant::now(),
            db,
            jobs,
        })
    }

    /// Get the server uptime in seconds.
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

// crates/server/src/config.rs
//! Server configuration, read once from the environment at startup.

use std::path::PathBuf;

/// Default port for the server.
const DEFAULT_PORT: u16 = 47710;

/// Default global cap on concurrently running heavy jobs.
const DEFAULT_MAX_HEAVY_JOBS: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub port: u16,
    /// Explicit database path; `None` means the platform default location.
    pub db_path: Option<PathBuf>,
    /// Global concurrency cap for heavy commands. Zero is allowed and
    /// parks every heavy job in the wait list.
    pub max_heavy_jobs: usize,
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let port = lookup("MACROVIEW_PORT")
            .or_else(|| lookup("PORT"))
            .and_then(|p| p.parse().ok())
            .unwrap_or(DEFAULT_PORT);
        let db_path = lookup("MACROVIEW_DB").map(PathBuf::from);
        let max_heavy_jobs = lookup("MACROVIEW_MAX_HEAVY_JOBS")
            .and_then(|n| n.parse().ok())
            .unwrap_or(DEFAULT_MAX_HEAVY_JOBS);
        Self {
            port,
            db_path,
            max_heavy_jobs,
        }
    }
}

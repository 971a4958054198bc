// crates/db/src/lib.rs
// SQLite persistence for macroview job history.

mod jobs;
mod migrations;

pub use jobs::JobRow;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::SqlitePool;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Failed to determine data directory")]
    NoDataDir,

    #[error("Failed to create database directory: {0}")]
    CreateDir(#[from] std::io::Error),
}

pub type DbResult<T> = Result<T, DbError>;

/// Main database handle wrapping a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl Database {
    /// Open (or create) the database at the given path and run migrations.
    pub async fn new(path: &Path) -> DbResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        let db = Self {
            pool,
            db_path: path.to_owned(),
        };
        db.run_migrations().await?;

        info!("Database opened at {}", path.display());
        Ok(db)
    }

    /// Create an in-memory database (for testing).
    ///
    /// Uses `shared_cache(true)` so all pool connections share the same
    /// in-memory database. Without this, each connection gets its own
    /// separate database, breaking concurrent queries.
    pub async fn new_in_memory() -> DbResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?
            .shared_cache(true)
            .busy_timeout(std::time::Duration::from_secs(5));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        let db = Self {
            pool,
            db_path: PathBuf::new(),
        };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Open the database at the default location:
    /// `~/.local/share/macroview/macroview.db` (platform data dir).
    pub async fn open_default() -> DbResult<Self> {
        let path = default_db_path()?;
        Self::new(&path).await
    }

    /// Path this database was opened at (empty for in-memory).
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Run all inline migrations.
    ///
    /// Uses a `_migrations` table to track which migrations have already been
    /// applied, so that non-idempotent statements are only executed once.
    async fn run_migrations(&self) -> DbResult<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS _migrations (version INTEGER PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        let row: (i64,) = sqlx::query_as("SELECT COALESCE(MAX(version), 0) FROM _migrations")
            .fetch_one(&self.pool)
            .await?;
        let current_version = row.0 as usize;

        for (i, migration) in migrations::MIGRATIONS.iter().enumerate() {
            let version = i + 1; // 1-based
            if version > current_version {
                sqlx::query(migration).execute(&self.pool).await?;
                sqlx::query("INSERT INTO _migrations (version) VALUES (?)")
                    .bind(version as i64)
                    .execute(&self.pool)
                    .await?;
            }
        }

        Ok(())
    }
}

/// Default database path in the platform data directory.
fn default_db_path() -> DbResult<PathBuf> {
    let dir = dirs::data_dir().ok_or(DbError::NoDataDir)?;
    Ok(dir.join("macroview").join("macroview.db"))
}

// crates/db/src/jobs.rs
// Job row CRUD for the macroview SQLite database.

use crate::{Database, DbResult};
use sqlx::Row;

/// A durable job record, one row per job.
///
/// Field types stay close to the SQLite column types; the server crate
/// owns the conversion to and from its richer in-memory `Job`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRow {
    pub id: String,
    pub owner: String,
    pub command: String,
    /// JSON object, verbatim as submitted.
    pub params: String,
    pub status: String,
    /// Unix milliseconds.
    pub queued_at: i64,
    pub started_at: Option<i64>,
    pub finished_at: Option<i64>,
    /// Newline-joined log lines.
    pub log_text: Option<String>,
    /// JSON array of opaque artefact identifiers.
    pub result_refs: Option<String>,
}

impl<'r> sqlx::FromRow<'r, sqlx::sqlite::SqliteRow> for JobRow {
    fn from_row(row: &'r sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner: row.try_get("owner")?,
            command: row.try_get("command")?,
            params: row.try_get("params")?,
            status: row.try_get("status")?,
            queued_at: row.try_get("queued_at")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
            log_text: row.try_get("log_text")?,
            result_refs: row.try_get("result_refs")?,
        })
    }
}

impl Database {
    /// Upsert the full current state of a job.
    ///
    /// Identity columns (owner, command, params, queued_at) never change
    /// after creation, so the conflict arm only touches the mutable ones.
    pub async fn upsert_job(&self, job: &JobRow) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, owner, command, params, status,
                              queued_at, started_at, finished_at, log_text, result_refs)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status      = excluded.status,
                started_at  = excluded.started_at,
                finished_at = excluded.finished_at,
                log_text    = excluded.log_text,
                result_refs = excluded.result_refs
            "#,
        )
        .bind(&job.id)
        .bind(&job.owner)
        .bind(&job.command)
        .bind(&job.params)
        .bind(&job.status)
        .bind(job.queued_at)
        .bind(job.started_at)
        .bind(job.finished_at)
        .bind(&job.log_text)
        .bind(&job.result_refs)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    /// Force-fail every stored job still marked queued or running.
    ///
    /// Called once at startup, before history is loaded: a job left in a
    /// non-terminal state by a previous process lifetime cannot actually be
    /// executing. Returns the number of rows updated.
    pub async fn fail_stale_jobs(&self, now_ms: i64) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE jobs SET status = 'failed', finished_at = ? \
             WHERE status IN ('queued', 'running')",
        )
        .bind(now_ms)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Most recent jobs across all owners, newest first.
    pub async fn recent_jobs(&self, limit: i64) -> DbResult<Vec<JobRow>> {
        let rows = sqlx::query_as::<_, JobRow>(
            "SELECT * FROM jobs ORDER BY queued_at DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// Remove one job row. Returns true if a row was deleted.
    pub async fn delete_job(&self, id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = ?")
            .bind(id)
            .execute(self.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Count completed jobs for an owner/command queued at or after the
    /// given instant (unix ms). Used for plan-based monthly quotas; the
    /// caller computes the month boundary since SQLite has no `date_trunc`.
    pub async fn count_monthly_done(
        &self,
        owner: &str,
        command: &str,
        since_ms: i64,
    ) -> DbResult<i64> {
        let row: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs \
             WHERE owner = ? AND command = ? AND status = 'done' AND queued_at >= ?",
        )
        .bind(owner)
        .bind(command)
        .bind(since_ms)
        .fetch_one(self.pool())
        .await?;
        Ok(row.0)
    }
}

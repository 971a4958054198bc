// crates/db/src/migrations.rs
/// Inline SQL migrations for the macroview database schema.
///
/// We use simple inline migrations rather than sqlx migration files
/// because the schema is small and self-contained.
pub const MIGRATIONS: &[&str] = &[
    // Migration 1: jobs table. One row per job; the log is stored as a
    // single newline-joined blob because it is append-only and read as a
    // whole on replay. Timestamps are unix milliseconds.
    r#"
CREATE TABLE IF NOT EXISTS jobs (
    id          TEXT PRIMARY KEY,
    owner       TEXT NOT NULL,
    command     TEXT NOT NULL,
    params      TEXT NOT NULL DEFAULT '{}',
    status      TEXT NOT NULL,
    queued_at   INTEGER NOT NULL,
    started_at  INTEGER,
    finished_at INTEGER,
    log_text    TEXT,
    result_refs TEXT
);
"#,
    // Migration 2: jobs indexes
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_owner ON jobs(owner);"#,
    r#"CREATE INDEX IF NOT EXISTS idx_jobs_queued_at ON jobs(queued_at DESC);"#,
];

// crates/server/src/jobs/types.rs
//! Core types for the background job subsystem.

use chrono::{DateTime, Utc};
use macroview_db::JobRow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a job, assigned at creation.
pub type JobId = Uuid;

/// The closed set of task types this server can run.
///
/// Heavy commands (the data-refresh pipelines and backfill) are subject to
/// the global concurrency cap; light commands start immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobCommand {
    CountryRefresh,
    IndustryRefresh,
    CompanyRefresh,
    UniverseRefresh,
    Backfill,
    PacketBuild,
    Echo,
}

impl JobCommand {
    /// Whether this command competes for a global concurrency slot.
    pub fn is_heavy(self) -> bool {
        matches!(
            self,
            JobCommand::CountryRefresh
                | JobCommand::IndustryRefresh
                | JobCommand::CompanyRefresh
                | JobCommand::UniverseRefresh
                | JobCommand::Backfill
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobCommand::CountryRefresh => "country_refresh",
            JobCommand::IndustryRefresh => "industry_refresh",
            JobCommand::CompanyRefresh => "company_refresh",
            JobCommand::UniverseRefresh => "universe_refresh",
            JobCommand::Backfill => "backfill",
            JobCommand::PacketBuild => "packet_build",
            JobCommand::Echo => "echo",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "country_refresh" => Some(JobCommand::CountryRefresh),
            "industry_refresh" => Some(JobCommand::IndustryRefresh),
            "company_refresh" => Some(JobCommand::CompanyRefresh),
            "universe_refresh" => Some(JobCommand::UniverseRefresh),
            "backfill" => Some(JobCommand::Backfill),
            "packet_build" => Some(JobCommand::PacketBuild),
            "echo" => Some(JobCommand::Echo),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status. Transitions are one-directional: once a job
/// reaches a terminal state it never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    /// Queued or running.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "done" => Some(JobStatus::Done),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// In-memory job state held by the registry. The log lines themselves live
/// in the job's `JobLog` (a separate synchronization domain) so that
/// high-frequency appends never contend with registry lookups.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub owner: String,
    pub command: JobCommand,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Opaque artefact identifiers attached by the handler on success.
    pub result_refs: Vec<String>,
}

impl Job {
    /// Flatten to a durable row. The caller supplies the current log lines
    /// since they are owned by the job's `JobLog`.
    pub fn to_row(&self, log_lines: &[String]) -> JobRow {
        JobRow {
            id: self.id.to_string(),
            owner: self.owner.clone(),
            command: self.command.as_str().to_string(),
            params: self.params.to_string(),
            status: self.status.as_str().to_string(),
            queued_at: self.queued_at.timestamp_millis(),
            started_at: self.started_at.map(|t| t.timestamp_millis()),
            finished_at: self.finished_at.map(|t| t.timestamp_millis()),
            log_text: if log_lines.is_empty() {
                None
            } else {
                Some(log_lines.join("\n"))
            },
            result_refs: if self.result_refs.is_empty() {
                None
            } else {
                serde_json::to_string(&self.result_refs).ok()
            },
        }
    }

    /// Rebuild from a durable row, returning the job and its stored log
    /// lines. Returns `None` for rows with an unknown command or status
    /// (schema drift from a newer version; skipped with a warning upstream).
    pub fn from_row(row: &JobRow) -> Option<(Job, Vec<String>)> {
        let id = Uuid::parse_str(&row.id).ok()?;
        let command = JobCommand::parse(&row.command)?;
        let status = JobStatus::parse(&row.status)?;
        let queued_at = DateTime::from_timestamp_millis(row.queued_at)?;
        let job = Job {
            id,
            owner: row.owner.clone(),
            command,
            params: serde_json::from_str(&row.params).unwrap_or(serde_json::Value::Null),
            status,
            queued_at,
            started_at: row.started_at.and_then(DateTime::from_timestamp_millis),
            finished_at: row.finished_at.and_then(DateTime::from_timestamp_millis),
            result_refs: row
                .result_refs
                .as_deref()
                .and_then(|s| serde_json::from_str(s).ok())
                .unwrap_or_default(),
        };
        let lines = row
            .log_text
            .as_deref()
            .map(|t| t.lines().map(str::to_string).collect())
            .unwrap_or_default();
        Some((job, lines))
    }
}

/// Request body for POST /api/jobs.
#[derive(Debug, Deserialize)]
pub struct SubmitJob {
    pub command: JobCommand,
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,
}

fn empty_params() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// Job summary returned by the list and submit endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub id: JobId,
    pub command: JobCommand,
    pub params: serde_json::Value,
    pub status: JobStatus,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            command: job.command,
            params: job.params.clone(),
            status: job.status,
            queued_at: job.queued_at,
            started_at: job.started_at,
            finished_at: job.finished_at,
        }
    }
}

/// Job detail: summary plus the flattened log and, while queued, the
/// 1-based position in the admission wait list.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    #[serde(flatten)]
    pub summary: JobSummary,
    pub log_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_command_str_roundtrip() {
        for cmd in [
            JobCommand::CountryRefresh,
            JobCommand::IndustryRefresh,
            JobCommand::CompanyRefresh,
            JobCommand::UniverseRefresh,
            JobCommand::Backfill,
            JobCommand::PacketBuild,
            JobCommand::Echo,
        ] {
            assert_eq!(JobCommand::parse(cmd.as_str()), Some(cmd));
        }
        assert_eq!(JobCommand::parse("mystery"), None);
    }

    #[test]
    fn test_heavy_light_split() {
        assert!(JobCommand::CountryRefresh.is_heavy());
        assert!(JobCommand::Backfill.is_heavy());
        assert!(!JobCommand::PacketBuild.is_heavy());
        assert!(!JobCommand::Echo.is_heavy());
    }

    #[test]
    fn test_status_terminal_and_active_partition() {
        for status in [
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Done,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_ne!(status.is_terminal(), status.is_active());
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
    }

    #[test]
    fn test_submit_job_defaults_params_to_empty_object() {
        let body: SubmitJob = serde_json::from_str(r#"{"command": "echo"}"#).unwrap();
        assert_eq!(body.command, JobCommand::Echo);
        assert_eq!(body.params, serde_json::json!({}));

        let body: SubmitJob =
            serde_json::from_str(r#"{"command": "backfill", "params": {"start_year": 2020}}"#)
                .unwrap();
        assert_eq!(body.params["start_year"], 2020);
    }

    fn sample_job() -> Job {
        Job {
            id: Uuid::new_v4(),
            owner: "u1".to_string(),
            command: JobCommand::Echo,
            params: serde_json::json!({"message": "hi"}),
            status: JobStatus::Done,
            queued_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
            started_at: Some(DateTime::from_timestamp_millis(1_700_000_001_000).unwrap()),
            finished_at: Some(DateTime::from_timestamp_millis(1_700_000_002_000).unwrap()),
            result_refs: vec!["a1".to_string()],
        }
    }

    #[test]
    fn test_row_roundtrip() {
        let job = sample_job();
        let lines = vec!["[1] hi".to_string(), "Done.".to_string()];
        let row = job.to_row(&lines);
        assert_eq!(row.status, "done");
        assert_eq!(row.log_text.as_deref(), Some("[1] hi\nDone."));
        assert_eq!(row.result_refs.as_deref(), Some(r#"["a1"]"#));

        let (back, back_lines) = Job::from_row(&row).unwrap();
        assert_eq!(back.id, job.id);
        assert_eq!(back.command, job.command);
        assert_eq!(back.status, job.status);
        assert_eq!(back.queued_at, job.queued_at);
        assert_eq!(back.result_refs, job.result_refs);
        assert_eq!(back_lines, lines);
    }

    #[test]
    fn test_from_row_rejects_unknown_command() {
        let job = sample_job();
        let mut row = job.to_row(&[]);
        row.command = "coffee_break".to_string();
        assert!(Job::from_row(&row).is_none());
    }

    #[test]
    fn test_detail_serialization_skips_absent_queue_position() {
        let job = sample_job();
        let detail = JobDetail {
            summary: JobSummary::from(&job),
            log_text: None,
            queue_position: None,
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert!(json.get("queue_position").is_none());
        assert_eq!(json["status"], "done");

        let detail = JobDetail {
            summary: JobSummary::from(&job),
            log_text: Some("x".to_string()),
            queue_position: Some(2),
        };
        let json = serde_json::to_value(&detail).unwrap();
        assert_eq!(json["queue_position"], 2);
    }
}

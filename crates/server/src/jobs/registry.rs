// crates/server/src/jobs/registry.rs
//! In-memory job index: the single source of truth for job existence,
//! ownership and status during this process lifetime.
//!
//! One mutex guards the whole index. Log appends go through each job's
//! `JobLog` (its own lock), so log throughput never contends with status
//! queries. Constructed explicitly and handed to the components that need
//! it; there is no process-global instance.

use super::log::JobLog;
use super::types::{Job, JobCommand, JobId, JobStatus};
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Outcome of a delete request, so the API can distinguish "no such job"
/// from "must cancel first".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Deleted,
    NotFound,
    NotTerminal,
}

struct Stored {
    job: Job,
    log: Arc<JobLog>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobId, Stored>,
    /// Jobs created in this process lifetime. Rows loaded from durable
    /// storage are indexed for display but never counted as active: they
    /// cannot actually be executing.
    active: HashSet<JobId>,
}

#[derive(Default)]
pub struct JobRegistry {
    inner: Mutex<Inner>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create a new queued job and mark it active for this lifetime.
    /// The caller must persist it durably before admitting it.
    pub fn create(&self, owner: &str, command: JobCommand, params: serde_json::Value) -> Job {
        let job = Job {
            id: Uuid::new_v4(),
            owner: owner.to_string(),
            command,
            params,
            status: JobStatus::Queued,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
            result_refs: Vec::new(),
        };
        let mut inner = self.lock();
        inner.active.insert(job.id);
        inner.jobs.insert(
            job.id,
            Stored {
                job: job.clone(),
                log: Arc::new(JobLog::new()),
            },
        );
        job
    }

    /// Insert a job read back from durable storage (display only, not active).
    pub fn load_existing(&self, job: Job, log_lines: Vec<String>) {
        let mut inner = self.lock();
        inner.jobs.entry(job.id).or_insert_with(|| Stored {
            log: Arc::new(JobLog::from_lines(log_lines)),
            job,
        });
    }

    /// Snapshot of one job's current state.
    pub fn get(&self, id: JobId) -> Option<Job> {
        self.lock().jobs.get(&id).map(|s| s.job.clone())
    }

    /// Handle to one job's log channel.
    pub fn log(&self, id: JobId) -> Option<Arc<JobLog>> {
        self.lock().jobs.get(&id).map(|s| Arc::clone(&s.log))
    }

    /// All of an owner's jobs, newest first.
    pub fn list_for_owner(&self, owner: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|s| s.job.owner == owner)
            .map(|s| s.job.clone())
            .collect();
        jobs.sort_by(|a, b| b.queued_at.cmp(&a.queued_at));
        jobs
    }

    /// Whether the owner has a queued or running job created in this
    /// process lifetime. At most one is allowed per owner.
    pub fn has_active_job(&self, owner: &str) -> bool {
        let inner = self.lock();
        inner.jobs.values().any(|s| {
            inner.active.contains(&s.job.id) && s.job.owner == owner && s.job.status.is_active()
        })
    }

    /// Transition queued/running → cancelled and release all stream
    /// observers via the sentinel. Returns false if the job is unknown or
    /// already terminal.
    pub fn mark_cancelled(&self, id: JobId) -> bool {
        let mut inner = self.lock();
        let Some(stored) = inner.jobs.get_mut(&id) else {
            return false;
        };
        if !stored.job.status.is_active() {
            return false;
        }
        stored.job.status = JobStatus::Cancelled;
        stored.job.finished_at = Some(Utc::now());
        stored.log.close();
        true
    }

    /// Remove a terminal job belonging to `owner` from the index.
    pub fn delete(&self, id: JobId, owner: &str) -> DeleteOutcome {
        let mut inner = self.lock();
        let Some(stored) = inner.jobs.get(&id) else {
            return DeleteOutcome::NotFound;
        };
        if stored.job.owner != owner {
            return DeleteOutcome::NotFound;
        }
        if !stored.job.status.is_terminal() {
            return DeleteOutcome::NotTerminal;
        }
        inner.jobs.remove(&id);
        inner.active.remove(&id);
        DeleteOutcome::Deleted
    }

    /// Runner: queued → running, stamping `started_at`. Returns the fresh
    /// snapshot, or `None` if the job is gone or was cancelled while waiting.
    pub fn begin(&self, id: JobId) -> Option<Job> {
        let mut inner = self.lock();
        let stored = inner.jobs.get_mut(&id)?;
        if stored.job.status != JobStatus::Queued {
            return None;
        }
        stored.job.status = JobStatus::Running;
        stored.job.started_at = Some(Utc::now());
        Some(stored.job.clone())
    }

    /// Runner: running → done. A no-op if the handler (or a cancellation)
    /// already moved the job to a terminal state.
    pub fn complete(&self, id: JobId) {
        let mut inner = self.lock();
        if let Some(stored) = inner.jobs.get_mut(&id) {
            if stored.job.status == JobStatus::Running {
                stored.job.status = JobStatus::Done;
            }
        }
    }

    /// Runner: any non-terminal state → failed.
    pub fn fail(&self, id: JobId) {
        let mut inner = self.lock();
        if let Some(stored) = inner.jobs.get_mut(&id) {
            if !stored.job.status.is_terminal() {
                stored.job.status = JobStatus::Failed;
            }
        }
    }

    /// Attach artefact identifiers produced by the handler.
    pub fn attach_results(&self, id: JobId, refs: Vec<String>) {
        let mut inner = self.lock();
        if let Some(stored) = inner.jobs.get_mut(&id) {
            stored.job.result_refs = refs;
        }
    }

    /// Runner: stamp `finished_at` (if not already stamped by cancellation)
    /// and return the final snapshot for the durable persist.
    pub fn finalize(&self, id: JobId) -> Option<Job> {
        let mut inner = self.lock();
        let stored = inner.jobs.get_mut(&id)?;
        if stored.job.finished_at.is_none() {
            stored.job.finished_at = Some(Utc::now());
        }
        Some(stored.job.clone())
    }
}

// crates/server/src/jobs/mod.rs
//! Background job subsystem: registry, admission queue, runner, handlers.

pub mod handlers;
pub mod log;
pub mod queue;
pub mod registry;
mod runner;
pub mod types;

pub use handlers::{Handler, HandlerFuture, HandlerSet, JobContext};
pub use log::{JobLog, LogEvent};
pub use queue::JobQueue;
pub use registry::{DeleteOutcome, JobRegistry};
pub use types::{Job, JobCommand, JobDetail, JobId, JobStatus, JobSummary, SubmitJob};

use chrono::Utc;
use macroview_db::{Database, DbResult};
use std::sync::Arc;

/// How many rows of job history to load into memory at startup.
const HISTORY_LOAD_LIMIT: i64 = 200;

/// The assembled job subsystem. Constructed once at process start and
/// shared through `AppState`; spawns one tokio task per started job.
pub struct JobSystem {
    pub registry: Arc<JobRegistry>,
    pub queue: Arc<JobQueue>,
    pub(crate) handlers: HandlerSet,
    pub(crate) db: Database,
}

impl JobSystem {
    pub fn new(db: Database, handlers: HandlerSet, max_heavy_jobs: usize) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(JobRegistry::new()),
            queue: Arc::new(JobQueue::new(max_heavy_jobs)),
            handlers,
            db,
        })
    }

    /// Startup reconciliation: force-fail every stored job left queued or
    /// running by a previous process lifetime, then load recent history
    /// into the registry for display. Returns (reconciled, loaded) counts.
    pub async fn startup(&self) -> DbResult<(u64, usize)> {
        let reconciled = self.db.fail_stale_jobs(Utc::now().timestamp_millis()).await?;
        if reconciled > 0 {
            tracing::warn!(
                count = reconciled,
                "force-failed stale jobs from a previous run"
            );
        }

        let rows = self.db.recent_jobs(HISTORY_LOAD_LIMIT).await?;
        let mut loaded = 0;
        for row in &rows {
            match Job::from_row(row) {
                Some((job, lines)) => {
                    self.registry.load_existing(job, lines);
                    loaded += 1;
                }
                None => {
                    tracing::warn!(job_id = %row.id, "skipping unreadable job row");
                }
            }
        }
        Ok((reconciled, loaded))
    }

    /// Admit a created-and-persisted job: start it now or queue it,
    /// depending on its weight and the free slots.
    pub fn enqueue(self: &Arc<Self>, job: &Job) {
        self.queue
            .enqueue(job.id, job.command.is_heavy(), &|id| self.spawn(id));
    }

    /// Spawn the execution task for one job. On completion of a heavy job,
    /// release its slot and promote the next waiting job.
    fn spawn(self: &Arc<Self>, id: JobId) {
        let sys = Arc::clone(self);
        tokio::spawn(async move {
            let heavy = sys
                .registry
                .get(id)
                .map(|job| job.command.is_heavy())
                .unwrap_or(false);

            runner::execute(&sys, id).await;

            if heavy {
                sys.queue
                    .release_and_promote(&sys.registry, &|next| sys.spawn(next));
            }
        });
    }
}

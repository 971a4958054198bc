// crates/server/src/jobs/runner.rs
//! Executes one job: handler invocation bracketed by the status
//! transitions and the final persist.
//!
//! Whatever the handler does, the job ends in a terminal state, the
//! stream sentinel fires exactly once, and the final state is written to
//! the store. A handler fault terminates only its own job; a persist
//! fault is logged and the in-memory state stays authoritative until the
//! next startup reconciliation.

use super::handlers::JobContext;
use super::types::JobId;
use super::JobSystem;
use std::sync::Arc;

pub(super) async fn execute(sys: &Arc<JobSystem>, id: JobId) {
    // None: the job vanished or was cancelled while waiting. Never started,
    // so there is nothing to finalize.
    let Some(job) = sys.registry.begin(id) else {
        return;
    };
    let Some(log) = sys.registry.log(id) else {
        return;
    };
    tracing::info!(job_id = %id, command = %job.command, "job started");

    let outcome = match sys.handlers.resolve(job.command) {
        Some(handler) => {
            let ctx = JobContext::new(
                id,
                job.params.clone(),
                sys.db.clone(),
                Arc::clone(&log),
                Arc::clone(&sys.registry),
            );
            handler(ctx).await
        }
        None => Err(anyhow::anyhow!(
            "no handler registered for command: {}",
            job.command
        )),
    };

    match outcome {
        Ok(()) => {
            sys.registry.complete(id);
            tracing::info!(job_id = %id, "job finished");
        }
        Err(e) => {
            tracing::error!(job_id = %id, error = %e, "job failed");
            log.append(format!("ERROR: {e}"));
            sys.registry.fail(id);
        }
    }

    let final_state = sys.registry.finalize(id);
    log.close();

    if let Some(job) = final_state {
        let row = job.to_row(&log.snapshot());
        if let Err(e) = sys.db.upsert_job(&row).await {
            tracing::error!(job_id = %id, error = %e, "failed to persist final job state");
        }
    }
}

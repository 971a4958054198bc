// crates/server/src/jobs/handlers/echo.rs
//! Echo handler: a light command for exercising the job system and the
//! log stream end to end.

use super::{HandlerFuture, JobContext};
use std::time::Duration;

const WORD_PAUSE: Duration = Duration::from_millis(300);

/// Emit each word of `params.message` as its own numbered log line,
/// then a final `Done.` line.
pub fn handler(ctx: JobContext) -> HandlerFuture {
    Box::pin(async move {
        let message = ctx
            .params
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Hello from macroview!")
            .to_string();

        for (i, word) in message.split_whitespace().enumerate() {
            ctx.emit(format!("[{}] {}", i + 1, word));
            tokio::time::sleep(WORD_PAUSE).await;
        }
        ctx.emit("Done.");
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::registry::JobRegistry;
    use crate::jobs::types::JobCommand;
    use macroview_db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    async fn run_echo(params: serde_json::Value) -> Vec<String> {
        let registry = Arc::new(JobRegistry::new());
        let job = registry.create("u1", JobCommand::Echo, params);
        let log = registry.log(job.id).unwrap();
        let db = Database::new_in_memory().await.unwrap();
        let ctx = JobContext::new(
            job.id,
            job.params.clone(),
            db,
            Arc::clone(&log),
            Arc::clone(&registry),
        );
        handler(ctx).await.unwrap();
        log.snapshot()
    }

    #[tokio::test]
    async fn test_echo_emits_numbered_words_then_done() {
        let lines = run_echo(json!({"message": "a b"})).await;
        assert_eq!(lines, vec!["[1] a", "[2] b", "Done."]);
    }

    #[tokio::test]
    async fn test_echo_empty_message_still_finishes() {
        let lines = run_echo(json!({"message": ""})).await;
        assert_eq!(lines, vec!["Done."]);
    }
}

// crates/server/src/jobs/handlers/mod.rs
//! Handler dispatch: the closed map from command to the async function
//! that does the work.
//!
//! Handlers are opaque to the runner: they receive a `JobContext` and
//! report success or failure. Everything a handler may touch (log channel,
//! registry, database) is carried by the context, so handler code never
//! shares state with the request that submitted the job.

pub mod echo;
pub mod refresh;

use super::log::JobLog;
use super::registry::JobRegistry;
use super::types::{JobCommand, JobId, JobStatus};
use macroview_db::Database;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed future returned by a handler invocation.
pub type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// A registered job handler.
pub type Handler = Box<dyn Fn(JobContext) -> HandlerFuture + Send + Sync>;

/// Everything a handler may observe or mutate while running.
#[derive(Clone)]
pub struct JobContext {
    pub id: JobId,
    pub params: serde_json::Value,
    pub db: Database,
    log: Arc<JobLog>,
    registry: Arc<JobRegistry>,
}

impl JobContext {
    pub(crate) fn new(
        id: JobId,
        params: serde_json::Value,
        db: Database,
        log: Arc<JobLog>,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            id,
            params,
            db,
            log,
            registry,
        }
    }

    /// Append a log line and fan it out to live stream observers.
    pub fn emit(&self, line: impl Into<String>) {
        self.log.append(line);
    }

    /// Cooperative cancellation check. Cancellation never interrupts a
    /// handler; well-behaved handlers poll this between units of work.
    pub fn is_cancelled(&self) -> bool {
        self.registry
            .get(self.id)
            .map(|job| job.status == JobStatus::Cancelled)
            .unwrap_or(true)
    }

    /// Attach artefact identifiers to the job's final state.
    pub fn attach_results(&self, refs: Vec<String>) {
        self.registry.attach_results(self.id, refs);
    }
}

/// Registry of handlers, resolved once at startup.
#[derive(Default)]
pub struct HandlerSet {
    handlers: HashMap<JobCommand, Handler>,
}

impl HandlerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a command. Duplicate registration is a
    /// configuration error and is rejected here rather than at dispatch.
    pub fn register(&mut self, command: JobCommand, handler: Handler) -> anyhow::Result<()> {
        if self.handlers.contains_key(&command) {
            anyhow::bail!("handler already registered for command {command}");
        }
        self.handlers.insert(command, handler);
        Ok(())
    }

    pub fn resolve(&self, command: JobCommand) -> Option<&Handler> {
        self.handlers.get(&command)
    }

    /// The full built-in set: echo plus the staged refresh pipelines.
    pub fn builtin() -> Self {
        let mut set = Self::new();
        let commands = [
            (JobCommand::Echo, Box::new(echo::handler) as Handler),
            (
                JobCommand::CountryRefresh,
                refresh::handler_for(JobCommand::CountryRefresh),
            ),
            (
                JobCommand::IndustryRefresh,
                refresh::handler_for(JobCommand::IndustryRefresh),
            ),
            (
                JobCommand::CompanyRefresh,
                refresh::handler_for(JobCommand::CompanyRefresh),
            ),
            (
                JobCommand::UniverseRefresh,
                refresh::handler_for(JobCommand::UniverseRefresh),
            ),
            (
                JobCommand::Backfill,
                refresh::handler_for(JobCommand::Backfill),
            ),
            (
                JobCommand::PacketBuild,
                refresh::handler_for(JobCommand::PacketBuild),
            ),
        ];
        for (command, handler) in commands {
            // The list above has one entry per command, so this cannot fail.
            set.register(command, handler)
                .expect("builtin handler set has no duplicates");
        }
        set
    }
}

// crates/server/src/main.rs
//! Macroview server binary.
//!
//! Opens the job store, reconciles jobs left over from a previous run,
//! and serves the HTTP API.

use std::net::SocketAddr;

use anyhow::Result;
use macroview_db::Database;
use macroview_server::jobs::{HandlerSet, JobSystem};
use macroview_server::{create_app, AppState, Config};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = Config::from_env();

    eprintln!("\n\u{1f4ca} macroview v{}\n", env!("CARGO_PKG_VERSION"));

    // Step 1: Open the database.
    let db = match &config.db_path {
        Some(path) => Database::new(path).await?,
        None => Database::open_default().await?,
    };

    // Step 2: Assemble the job subsystem and reconcile stale state.
    let jobs = JobSystem::new(db.clone(), HandlerSet::builtin(), config.max_heavy_jobs);
    let (reconciled, loaded) = jobs.startup().await?;
    tracing::info!(
        reconciled,
        loaded,
        max_heavy_jobs = config.max_heavy_jobs,
        "job subsystem ready"
    );

    // Step 3: Build the Axum app.
    let state = AppState::new(db, jobs);
    let app = create_app(state);

    // Step 4: Bind and serve.
    let addr = SocketAddr::from(([127, 0, 0, 1], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    eprintln!("  \u{2192} http://localhost:{}\n", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}

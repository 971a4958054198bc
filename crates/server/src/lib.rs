// crates/server/src/lib.rs
//! Macroview server library.
//!
//! This crate provides the Axum-based HTTP server for the macroview job
//! subsystem: a bounded-concurrency executor for data-refresh pipelines
//! with live log streaming over SSE and a SQLite-backed job history.

pub mod auth;
pub mod config;
pub mod error;
pub mod jobs;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorResponse};
pub use routes::api_routes;
pub use state::AppState;

use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs)
/// - CORS for development (allows any origin)
/// - Request tracing
pub fn create_app(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

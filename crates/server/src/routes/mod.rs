// crates/server/src/routes/mod.rs
//! HTTP route registration.

use axum::Router;
use std::sync::Arc;

use crate::state::AppState;

pub mod health;
pub mod jobs;

/// All API routes, mounted under `/api`.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest(
            "/api",
            Router::new()
                .merge(health::router())
                .merge(jobs::router()),
        )
        .with_state(state)
}

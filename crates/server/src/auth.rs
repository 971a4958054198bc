// crates/server/src/auth.rs
//! Caller identity at the subsystem boundary.
//!
//! Session establishment and billing live outside this service; the
//! fronting proxy authenticates the request and forwards the resolved
//! identity in `x-user-id` and the plan tier in `x-user-plan`. A request
//! that reaches us without an identity header is rejected with 401.

use crate::error::ApiError;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Free,
    Pro,
}

#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: String,
    pub plan: Plan,
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|s| !s.is_empty())
            .ok_or(ApiError::Unauthorized)?
            .to_string();

        let plan = match parts
            .headers
            .get("x-user-plan")
            .and_then(|v| v.to_str().ok())
        {
            Some("pro") => Plan::Pro,
            _ => Plan::Free,
        };

        Ok(CurrentUser { id, plan })
    }
}

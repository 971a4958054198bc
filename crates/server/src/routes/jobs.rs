// crates/server/src/routes/jobs.rs
//! API routes for the background job subsystem.
//!
//! - POST   /jobs              — submit a job
//! - GET    /jobs              — list the caller's jobs, newest first
//! - GET    /jobs/{id}         — job detail (log + queue position)
//! - GET    /jobs/{id}/stream  — live SSE log stream
//! - POST   /jobs/{id}/cancel  — cancel a queued or running job
//! - DELETE /jobs/{id}         — delete a finished job from history

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Datelike, TimeZone, Utc};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::{CurrentUser, Plan};
use crate::error::{ApiError, ApiResult};
use crate::jobs::{
    DeleteOutcome, Job, JobCommand, JobDetail, JobId, JobStatus, JobSummary, LogEvent, SubmitJob,
};
use crate::state::AppState;

/// Idle interval after which the stream emits a keepalive ping.
const STREAM_KEEPALIVE: Duration = Duration::from_secs(5);

/// Monthly per-command job limits on the free plan. Commands not listed
/// here are unmetered.
const FREE_LIMITS: &[(JobCommand, i64)] = &[
    (JobCommand::CountryRefresh, 5),
    (JobCommand::IndustryRefresh, 5),
    (JobCommand::CompanyRefresh, 5),
    (JobCommand::UniverseRefresh, 2),
    (JobCommand::Backfill, 2),
];

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(submit_job).get(list_jobs))
        .route("/jobs/{id}", get(job_detail).delete(delete_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

/// Look up a job and enforce ownership. Absent and foreign-owned jobs are
/// indistinguishable to the caller.
fn owned_job(state: &AppState, id: JobId, user: &CurrentUser) -> ApiResult<Job> {
    state
        .jobs
        .registry
        .get(id)
        .filter(|job| job.owner == user.id)
        .ok_or(ApiError::JobNotFound(id))
}

/// First instant of the current UTC month, the quota window lower bound.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

async fn check_plan_limit(
    state: &AppState,
    user: &CurrentUser,
    command: JobCommand,
) -> ApiResult<()> {
    if user.plan == Plan::Pro {
        return Ok(());
    }
    let Some(&(_, limit)) = FREE_LIMITS.iter().find(|(c, _)| *c == command) else {
        return Ok(());
    };
    let since = month_start(Utc::now()).timestamp_millis();
    let used = state
        .db
        .count_monthly_done(&user.id, command.as_str(), since)
        .await?;
    if used >= limit {
        return Err(ApiError::QuotaExceeded {
            command,
            used,
            limit,
        });
    }
    Ok(())
}

/// POST /api/jobs — submit a new job.
async fn submit_job(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    Json(body): Json<SubmitJob>,
) -> ApiResult<Json<JobSummary>> {
    if state.jobs.registry.has_active_job(&user.id) {
        return Err(ApiError::ActiveJobExists);
    }
    check_plan_limit(&state, &user, body.command).await?;

    let job = state.jobs.registry.create(&user.id, body.command, body.params);
    // Persist before admission: a crash in between leaves a queued row that
    // startup reconciliation will force-fail.
    state.db.upsert_job(&job.to_row(&[])).await?;
    state.jobs.enqueue(&job);

    tracing::info!(job_id = %job.id, command = %job.command, owner = %user.id, "job submitted");
    Ok(Json(JobSummary::from(&job)))
}

/// GET /api/jobs — list the caller's jobs, newest first.
async fn list_jobs(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
) -> Json<Vec<JobSummary>> {
    let jobs = state.jobs.registry.list_for_owner(&user.id);
    Json(jobs.iter().map(JobSummary::from).collect())
}

/// GET /api/jobs/{id} — job detail including the flattened log and, while
/// queued, the admission wait-list position.
async fn job_detail(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    user: CurrentUser,
) -> ApiResult<Json<JobDetail>> {
    let job = owned_job(&state, id, &user)?;
    let log_lines = state
        .jobs
        .registry
        .log(id)
        .map(|log| log.snapshot())
        .unwrap_or_default();
    let queue_position = if job.status == JobStatus::Queued {
        state.jobs.queue.queue_position(id)
    } else {
        None
    };
    Ok(Json(JobDetail {
        summary: JobSummary::from(&job),
        log_text: if log_lines.is_empty() {
            None
        } else {
            Some(log_lines.join("\n"))
        },
        queue_position,
    }))
}

fn message_event(line: &str) -> Result<Event, Infallible> {
    Ok(Event::default()
        .event("message")
        .data(serde_json::json!({ "line": line }).to_string()))
}

fn named_event(name: &str) -> Result<Event, Infallible> {
    Ok(Event::default().event(name).data(""))
}

/// GET /api/jobs/{id}/stream — SSE stream of the job's log.
///
/// Three temporal cases: a queued job gets a single `queued` event (poll
/// and retry later); a finished job gets a full replay and `done`; a
/// running job gets replay-then-live with `ping` keepalives while idle.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    user: CurrentUser,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = owned_job(&state, id, &user)?;
    let log = state
        .jobs
        .registry
        .log(id)
        .ok_or(ApiError::JobNotFound(id))?;

    let status = job.status;
    let stream = async_stream::stream! {
        if status == JobStatus::Queued {
            yield named_event("queued");
            return;
        }

        if status.is_terminal() {
            for line in log.snapshot() {
                yield message_event(&line);
            }
            yield named_event("done");
            return;
        }

        // Running: replay what exists, then tail the channel. The snapshot
        // and the subscription are taken atomically, so the splice point
        // neither drops nor repeats a line.
        let (snapshot, mut rx) = log.subscribe();
        for line in snapshot {
            yield message_event(&line);
        }
        loop {
            match tokio::time::timeout(STREAM_KEEPALIVE, rx.recv()).await {
                Ok(Some(LogEvent::Line(line))) => yield message_event(&line),
                Ok(Some(LogEvent::Eof)) | Ok(None) => {
                    yield named_event("done");
                    break;
                }
                Err(_) => yield named_event("ping"),
            }
        }
    };

    Ok(Sse::new(stream))
}

/// POST /api/jobs/{id}/cancel — cancel a queued or running job.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    user: CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    let _ = owned_job(&state, id, &user)?;

    if !state.jobs.registry.mark_cancelled(id) {
        return Err(ApiError::BadRequest("Job cannot be cancelled".to_string()));
    }
    state.jobs.queue.remove(id);

    // Persist the cancelled state; the runner will not do it for a job
    // that never starts.
    if let Some(job) = state.jobs.registry.get(id) {
        let log_lines = state
            .jobs
            .registry
            .log(id)
            .map(|log| log.snapshot())
            .unwrap_or_default();
        state.db.upsert_job(&job.to_row(&log_lines)).await?;
    }

    tracing::info!(job_id = %id, owner = %user.id, "job cancelled");
    Ok(Json(serde_json::json!({ "ok": true })))
}

/// DELETE /api/jobs/{id} — delete a finished job from history.
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<JobId>,
    user: CurrentUser,
) -> ApiResult<Json<serde_json::Value>> {
    match state.jobs.registry.delete(id, &user.id) {
        DeleteOutcome::Deleted => {
            state.db.delete_job(&id.to_string()).await?;
            Ok(Json(serde_json::json!({ "ok": true })))
        }
        DeleteOutcome::NotFound => Err(ApiError::JobNotFound(id)),
        DeleteOutcome::NotTerminal => Err(ApiError::BadRequest(
            "Cannot delete a running or queued job. Cancel it first.".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{HandlerSet, JobSystem};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use macroview_db::Database;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tower::ServiceExt;

    async fn test_app(max_heavy: usize) -> (Router, Arc<AppState>) {
        let db = Database::new_in_memory().await.unwrap();
        let jobs = JobSystem::new(db.clone(), HandlerSet::builtin(), max_heavy);
        let state = AppState::new(db, jobs);
        let app = Router::new()
            .nest("/api", router())
            .with_state(Arc::clone(&state));
        (app, state)
    }

    fn request(method: &str, uri: &str, user: Option<&str>, body: Option<serde_json::Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header("x-user-id", user);
        }
        match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(req).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn test_submit_requires_identity() {
        let (app, _state) = test_app(4).await;
        let (status, _) = send(
            &app,
            request("POST", "/api/jobs", None, Some(json!({"command": "echo"}))),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_submit_and_list() {
        let (app, _state) = test_app(0).await;
        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["command"], "backfill");
        assert_eq!(body["status"], "queued");
        assert!(body["started_at"].is_null());

        let (status, body) = send(&app, request("GET", "/api/jobs", Some("u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 1);

        // Another owner sees nothing.
        let (_, body) = send(&app, request("GET", "/api/jobs", Some("u2"), None)).await;
        assert!(body.as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_submission_conflicts() {
        let (app, _state) = test_app(0).await;
        let submit = || {
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            )
        };
        let (status, _) = send(&app, submit()).await;
        assert_eq!(status, StatusCode::OK);
        let (status, body) = send(&app, submit()).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("already have a job"));
    }

    #[tokio::test]
    async fn test_quota_exhaustion_returns_402() {
        let (app, state) = test_app(0).await;
        // Two completed universe_refresh jobs this month exhaust the free plan.
        let registry = crate::jobs::JobRegistry::new();
        for _ in 0..2 {
            let mut job = registry.create("u1", JobCommand::UniverseRefresh, json!({}));
            job.status = JobStatus::Done;
            state.db.upsert_job(&job.to_row(&[])).await.unwrap();
        }

        let (status, body) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "universe_refresh"})),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
        assert!(body["error"].as_str().unwrap().contains("2/2"));

        // The pro plan is unmetered.
        let req = Request::builder()
            .method("POST")
            .uri("/api/jobs")
            .header("x-user-id", "u1")
            .header("x-user-plan", "pro")
            .header("content-type", "application/json")
            .body(Body::from(json!({"command": "universe_refresh"}).to_string()))
            .unwrap();
        let (status, _) = send(&app, req).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_detail_includes_queue_position_while_queued() {
        let (app, _state) = test_app(0).await;
        let (_, first) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            ),
        )
        .await;
        let (_, second) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u2"),
                Some(json!({"command": "country_refresh"})),
            ),
        )
        .await;

        let uri = format!("/api/jobs/{}", first["id"].as_str().unwrap());
        let (status, body) = send(&app, request("GET", &uri, Some("u1"), None)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["queue_position"], 1);

        let uri = format!("/api/jobs/{}", second["id"].as_str().unwrap());
        let (_, body) = send(&app, request("GET", &uri, Some("u2"), None)).await;
        assert_eq!(body["queue_position"], 2);
    }

    #[tokio::test]
    async fn test_foreign_job_is_not_found() {
        let (app, _state) = test_app(0).await;
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            ),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        for (method, uri) in [
            ("GET", format!("/api/jobs/{id}")),
            ("GET", format!("/api/jobs/{id}/stream")),
            ("POST", format!("/api/jobs/{id}/cancel")),
            ("DELETE", format!("/api/jobs/{id}")),
        ] {
            let (status, _) = send(&app, request(method, &uri, Some("intruder"), None)).await;
            assert_eq!(status, StatusCode::NOT_FOUND, "{method} {uri}");
        }
    }

    #[tokio::test]
    async fn test_cancel_then_delete_queued_job() {
        let (app, state) = test_app(0).await;
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            ),
        )
        .await;
        let id = created["id"].as_str().unwrap().to_string();

        // Cannot delete while queued.
        let (status, _) = send(
            &app,
            request("DELETE", &format!("/api/jobs/{id}"), Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            request("POST", &format!("/api/jobs/{id}/cancel"), Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);

        // A second cancel is a 400: the job is already terminal.
        let (status, _) = send(
            &app,
            request("POST", &format!("/api/jobs/{id}/cancel"), Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // Now deletable, and gone from both the index and the store.
        let (status, body) = send(
            &app,
            request("DELETE", &format!("/api/jobs/{id}"), Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert!(state.db.recent_jobs(10).await.unwrap().is_empty());

        let (status, _) = send(
            &app,
            request("GET", &format!("/api/jobs/{id}"), Some("u1"), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_stream_of_queued_job_says_queued() {
        let (app, _state) = test_app(0).await;
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "backfill"})),
            ),
        )
        .await;
        let id = created["id"].as_str().unwrap();

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/jobs/{id}/stream"),
                Some("u1"),
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("event: queued"), "{text}");
        assert!(!text.contains("event: message"));
    }

    #[tokio::test]
    async fn test_stream_replays_terminal_job() {
        let (app, state) = test_app(4).await;
        let (_, created) = send(
            &app,
            request(
                "POST",
                "/api/jobs",
                Some("u1"),
                Some(json!({"command": "echo", "params": {"message": "a b"}})),
            ),
        )
        .await;
        let id: JobId = created["id"].as_str().unwrap().parse().unwrap();

        // Wait for the echo job to finish.
        for _ in 0..500 {
            if state
                .jobs
                .registry
                .get(id)
                .map(|j| j.status.is_terminal())
                .unwrap_or(false)
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(state.jobs.registry.get(id).unwrap().status, JobStatus::Done);

        let response = app
            .clone()
            .oneshot(request(
                "GET",
                &format!("/api/jobs/{id}/stream"),
                Some("u1"),
                None,
            ))
            .await
            .unwrap();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();

        let messages: Vec<&str> = text
            .lines()
            .filter(|l| l.starts_with("data: {"))
            .collect();
        assert_eq!(
            messages,
            vec![
                r#"data: {"line":"[1] a"}"#,
                r#"data: {"line":"[2] b"}"#,
                r#"data: {"line":"Done."}"#,
            ]
        );
        let done_count = text.matches("event: done").count();
        assert_eq!(done_count, 1);
    }

    #[test]
    fn test_month_start() {
        let now = DateTime::parse_from_rfc3339("2026-08-28T17:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let start = month_start(now);
        assert_eq!(start.to_rfc3339(), "2026-08-01T00:00:00+00:00");
    }
}

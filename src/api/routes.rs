//! API route definitions.

use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::error;

use super::state::AppState;
use crate::job::JobId;

/// Executions returned by the history endpoint.
const HISTORY_LIMIT: usize = 5;

/// Simulated latency of the built-in dummy target.
const DUMMY_DELAY: Duration = Duration::from_secs(2);

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs", post(create_job))
        .route("/jobs/{job_id}/executions", get(job_executions))
        .route("/health", get(health))
        .route("/dummy", post(dummy))
}

#[derive(Debug, Default, Deserialize)]
struct CreateJobRequest {
    schedule: Option<String>,
    api: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

type ApiResponse = (StatusCode, Json<Value>);

fn required(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

async fn create_job(State(state): State<AppState>, Json(req): Json<CreateJobRequest>) -> ApiResponse {
    let (Some(schedule), Some(target), Some(kind)) =
        (required(&req.schedule), required(&req.api), required(&req.kind))
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing required fields: schedule, api, type" })),
        );
    };

    let job = match state.store.create_job(schedule, target, kind).await {
        Ok(job) => job,
        Err(e) => {
            error!(error = %e, "Error creating job");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to create job" })),
            );
        }
    };

    // A bad expression is logged by the registry; the job stays stored but unscheduled
    state.scheduler.schedule_job(&job.id, &job.schedule, &job.target);

    (StatusCode::CREATED, Json(json!({ "jobId": job.id })))
}

async fn job_executions(State(state): State<AppState>, Path(job_id): Path<String>) -> ApiResponse {
    let job_id = JobId::from(job_id);
    match state.store.recent_executions(&job_id, HISTORY_LIMIT).await {
        Ok(records) => (StatusCode::OK, Json(json!(records))),
        Err(e) => {
            error!(%job_id, error = %e, "Error fetching job executions");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to fetch job executions" })),
            )
        }
    }
}

async fn health(State(state): State<AppState>) -> ApiResponse {
    let timestamp = chrono::Utc::now().to_rfc3339();
    match state.store.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": timestamp,
                "worker": {
                    "queueSize": state.scheduler.queue_size(),
                    "activeWorkers": state.scheduler.active_workers(),
                },
            })),
        ),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": timestamp,
                    "error": "Database connection failed",
                })),
            )
        }
    }
}

async fn dummy() -> Json<Value> {
    tokio::time::sleep(DUMMY_DELAY).await;
    Json(json!({ "message": "Dummy API success" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ExecutionOutcome;
    use crate::scheduler::dispatch::tests::StubInvoker;
    use crate::scheduler::Scheduler;
    use crate::storage::{self, JobStore, SqliteStore};
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn state() -> AppState {
        let store = SqliteStore::new(storage::open_in_memory().unwrap());
        let scheduler = Scheduler::new(
            Arc::new(store.clone()),
            Arc::new(StubInvoker::default()),
            10,
        );
        AppState { store, scheduler }
    }

    async fn send(state: &AppState, req: Request<Body>) -> (StatusCode, Value) {
        let resp = crate::api::router(state.clone()).oneshot(req).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_job_persists_and_schedules() {
        let state = state();
        let (status, body) = send(
            &state,
            post_json(
                "/jobs",
                json!({ "schedule": "*/5 * * * *", "api": "http://x.test/hook", "type": "http" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        let job_id = JobId::from(body["jobId"].as_str().unwrap());
        assert!(state.scheduler.is_scheduled(&job_id));

        let jobs = state.store.list_jobs().await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id, job_id);
        assert_eq!(jobs[0].target, "http://x.test/hook");
        assert_eq!(jobs[0].kind, "http");
    }

    #[tokio::test]
    async fn test_create_job_missing_fields() {
        let state = state();
        for body in [
            json!({ "api": "http://x.test/", "type": "http" }),
            json!({ "schedule": "* * * * *", "type": "http" }),
            json!({ "schedule": "* * * * *", "api": "http://x.test/" }),
            json!({ "schedule": "", "api": "http://x.test/", "type": "http" }),
        ] {
            let (status, resp) = send(&state, post_json("/jobs", body)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(resp["error"], "Missing required fields: schedule, api, type");
        }
        assert!(state.store.list_jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_job_with_bad_cron_is_stored_unscheduled() {
        let state = state();
        let (status, body) = send(
            &state,
            post_json(
                "/jobs",
                json!({ "schedule": "not-a-cron", "api": "http://x.test/", "type": "http" }),
            ),
        )
        .await;

        assert_eq!(status, StatusCode::CREATED);
        let job_id = JobId::from(body["jobId"].as_str().unwrap());
        assert!(!state.scheduler.is_scheduled(&job_id));
        assert_eq!(state.store.list_jobs().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_executions_endpoint_returns_recent_history() {
        let state = state();
        let job = state
            .store
            .create_job("* * * * *", "http://x.test/", "http")
            .await
            .unwrap();
        for (i, status) in [Some(200), Some(500), None].into_iter().enumerate() {
            state
                .store
                .append_execution(&ExecutionOutcome {
                    job_id: job.id.clone(),
                    status_code: status,
                    duration_ms: 10 * i as u64,
                    success: status == Some(200),
                    executed_at: chrono::Utc::now() + chrono::Duration::seconds(i as i64),
                })
                .await
                .unwrap();
        }

        let uri = format!("/jobs/{}/executions", job.id);
        let (status, body) = send(&state, Request::get(uri).body(Body::empty()).unwrap()).await;

        assert_eq!(status, StatusCode::OK);
        let list = body.as_array().unwrap();
        assert_eq!(list.len(), 3);
        assert!(list[0]["statusCode"].is_null());
        assert_eq!(list[0]["success"], false);
        assert_eq!(list[1]["statusCode"], 500);
        assert_eq!(list[2]["statusCode"], 200);
        assert_eq!(list[2]["success"], true);
        assert!(list[0]["executedAt"].is_string());
        assert!(list[0]["durationMs"].is_number());
        assert!(list[0]["id"].is_number());
    }

    #[tokio::test]
    async fn test_executions_for_unknown_job_is_empty() {
        let state = state();
        let req = Request::get("/jobs/nope/executions").body(Body::empty()).unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_health_reports_worker_status() {
        let state = state();
        let req = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&state, req).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["worker"]["queueSize"], 0);
        assert_eq!(body["worker"]["activeWorkers"], 0);
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dummy_target() {
        let state = state();
        let req = Request::post("/dummy").body(Body::empty()).unwrap();
        let (status, body) = send(&state, req).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Dummy API success");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let state = state();
        let req = Request::get("/nope").body(Body::empty()).unwrap();
        let (status, _) = send(&state, req).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

//! HTTP job API for vodkeeper
//!
//! The recorder posts jobs here; the dashboard polls the listing and status.

use crate::job_runner::{JobRunner, SubmitError};
use crate::jobs::JobSubmission;
use crate::retention::Cleaner;
use crate::status::StatusSnapshot;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

/// Errors that can occur when running the API server
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Invalid listen address {0}")]
    InvalidAddress(String),

    #[error("Failed to bind to address: {0}")]
    BindError(#[from] std::io::Error),
}

/// Response envelope; empty fields are omitted.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiResponse<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Seconds the request took, for jobs run synchronously
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<f64>,
}

impl<T: Serialize> ApiResponse<T> {
    fn data(data: T) -> Self {
        Self {
            data: Some(data),
            error: None,
            time: None,
        }
    }

    fn into_response_with(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    ApiResponse::<()> {
        data: None,
        error: Some(message.into()),
        time: None,
    }
    .into_response_with(status)
}

/// Shared state for the handlers.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<JobRunner>,
    pub cleaner: Option<Cleaner>,
}

#[derive(Debug, Deserialize)]
struct RunParams {
    /// Present (with any value) to return before the job finishes
    immediate: Option<String>,
}

/// POST /job/run
async fn run_job(
    State(state): State<AppState>,
    Query(params): Query<RunParams>,
    body: Result<Json<JobSubmission>, JsonRejection>,
) -> Response {
    let submission = match body {
        Ok(Json(s)) => s,
        Err(e) => return failure(StatusCode::BAD_REQUEST, e.body_text()),
    };
    debug!(input = %submission.input.display(), "POST /job/run");

    let id = match state.runner.submit(submission).await {
        Ok(id) => id,
        Err(e @ SubmitError::SourceNotFound(_)) => {
            return failure(StatusCode::BAD_REQUEST, e.to_string())
        }
        Err(e) => return failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    };

    if params.immediate.is_some() {
        let runner = state.runner.clone();
        tokio::spawn(
            async move {
                if let Err(e) = runner.run_job(id).await {
                    error!(job = %id, error = %e, "background job not run");
                }
            }
            .instrument(info_span!("runner", job = %id)),
        );
        return ApiResponse::data(state.runner.get(id).await).into_response_with(StatusCode::OK);
    }

    let started = Instant::now();
    let result = state
        .runner
        .run_job(id)
        .instrument(info_span!("runner", job = %id))
        .await;
    match result {
        Ok(job) => ApiResponse {
            data: Some(job),
            error: None,
            time: Some(started.elapsed().as_secs_f64()),
        }
        .into_response_with(StatusCode::OK),
        Err(e @ SubmitError::ShuttingDown) => {
            failure(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
        }
        Err(e) => failure(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// GET /job/list
async fn list_jobs(State(state): State<AppState>) -> Response {
    ApiResponse::data(state.runner.list_jobs().await).into_response_with(StatusCode::OK)
}

/// GET /status
async fn status(State(state): State<AppState>) -> Response {
    let snapshot = StatusSnapshot::collect(&state.runner, state.cleaner.as_ref()).await;
    ApiResponse::data(snapshot).into_response_with(StatusCode::OK)
}

/// Creates the axum Router with the job endpoints
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/job/run", post(run_job))
        .route("/job/list", get(list_jobs))
        .route("/status", get(status))
        .with_state(state)
}

/// Serve the API on `listen_address` until `cancel` fires.
pub async fn run_server(
    listen_address: &str,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), ServerError> {
    let addr: SocketAddr = listen_address
        .parse()
        .map_err(|_| ServerError::InvalidAddress(listen_address.to_string()))?;
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "job API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("job API stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job_runner::tests::{harness, Harness};
    use crate::jobs::{Job, JobStage};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use std::fs;
    use tower::ServiceExt;

    fn app(h: &Harness) -> Router {
        create_router(AppState {
            runner: h.runner.clone(),
            cleaner: None,
        })
    }

    async fn body_json(response: Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_job(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn submission_json(input: &str) -> Value {
        json!({
            "input": input,
            "title": "Lore",
            "user": "someone",
            "createdAt": "2020-04-01T18:30:00"
        })
    }

    #[tokio::test]
    async fn test_run_job_waits_and_reports_time() {
        let h = harness();
        fs::write(h.source("a.flv"), b"raw").unwrap();

        let response = app(&h)
            .oneshot(post_job("/job/run", submission_json("a.flv")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body: ApiResponse<Job> = serde_json::from_value(body_json(response).await).unwrap();
        assert!(body.time.is_some());
        assert_eq!(body.error, None);
        let job = body.data.unwrap();
        assert_eq!(job.stage, JobStage::Deleted);
        assert_eq!(job.out_file.as_deref(), Some("200401-1830_Lore.mp4"));
    }

    #[tokio::test]
    async fn test_immediate_returns_accepted_job() {
        let h = harness();
        fs::write(h.source("a.flv"), b"raw").unwrap();

        let response = app(&h)
            .oneshot(post_job("/job/run?immediate", submission_json("a.flv")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert!(body.get("time").is_none());
        assert_eq!(body["data"]["title"], "Lore");
    }

    #[tokio::test]
    async fn test_missing_source_is_bad_request() {
        let h = harness();

        let response = app(&h)
            .oneshot(post_job("/job/run", submission_json("gone.flv")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"]
            .as_str()
            .unwrap()
            .starts_with("Source file not found"));
        assert!(body.get("data").is_none());

        let jobs = h.runner.list_jobs().await;
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].ignored);
    }

    #[tokio::test]
    async fn test_malformed_body_is_bad_request() {
        let h = harness();
        let response = app(&h)
            .oneshot(post_job("/job/run", json!({"title": "no input"})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_list_and_status() {
        let h = harness();
        fs::write(h.source("a.flv"), b"raw").unwrap();
        app(&h)
            .oneshot(post_job("/job/run", submission_json("a.flv")))
            .await
            .unwrap();

        let response = app(&h)
            .oneshot(Request::builder().uri("/job/list").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let response = app(&h)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["data"]["total_jobs"], 1);
        assert_eq!(body["data"]["jobs_by_stage"]["deleted"], 1);
        assert!(body["data"]["retention"].is_null());
    }

    #[tokio::test]
    async fn test_invalid_listen_address() {
        let h = harness();
        let result = run_server(
            "not an address",
            AppState {
                runner: h.runner.clone(),
                cleaner: None,
            },
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(ServerError::InvalidAddress(_))));
    }
}

//! Status views and operator actions.

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sitehook_core::BuildStatus;
use sitehook_runner::schedule::ScheduledJob;
use sitehook_runner::{BuildOptions, BuildRunner};
use std::sync::Arc;
use tracing::{error, info};

use crate::AppState;
use crate::auth::require_basic_auth;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview))
        .route("/{name}", get(target_status))
        .route("/{name}/rerun", post(rerun))
        .route("/{name}/clean_working_dir", post(clean_working_dir))
}

#[derive(Debug, Serialize)]
pub struct TargetSummary {
    pub name: String,
    pub branch: String,
    pub busy: bool,
    pub latest: Option<BuildStatus>,
    pub schedules: Vec<ScheduledJob>,
}

#[derive(Debug, Serialize)]
pub struct TargetStatus {
    #[serde(flatten)]
    pub summary: TargetSummary,
    pub clone_url: String,
    pub start: i64,
    pub end: i64,
    pub total: usize,
    pub events: Vec<BuildStatus>,
}

/// Window into the status log, counted from the newest event.
#[derive(Debug, Deserialize)]
pub struct Range {
    #[serde(default)]
    pub start: i64,
    #[serde(default = "default_end")]
    pub end: i64,
}

fn default_end() -> i64 {
    50
}

impl Range {
    /// Negative offsets count as zero.
    pub fn clamped(&self) -> (i64, i64) {
        (self.start.max(0), self.end.max(0))
    }
}

fn summary(state: &AppState, runner: &BuildRunner) -> TargetSummary {
    TargetSummary {
        name: runner.name().to_string(),
        branch: runner.branch().to_string(),
        busy: runner.is_busy(),
        latest: runner.status().latest(),
        schedules: state.scheduler.jobs_for(runner.name()),
    }
}

pub(crate) fn find_runner(state: &AppState, name: &str) -> Result<Arc<BuildRunner>, ApiError> {
    state
        .runner(name)
        .cloned()
        .ok_or_else(|| ApiError::NotFound(format!("unknown target '{}'", name)))
}

/// Every target with its latest event.
async fn overview(State(state): State<AppState>) -> Json<Vec<TargetSummary>> {
    Json(
        state
            .runners
            .values()
            .map(|runner| summary(&state, runner))
            .collect(),
    )
}

async fn target_status(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(range): Query<Range>,
    headers: HeaderMap,
) -> Result<Json<TargetStatus>, ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;

    let (start, end) = range.clamped();
    Ok(Json(TargetStatus {
        summary: summary(&state, &runner),
        clone_url: runner.target().clone_url.clone(),
        start,
        end,
        total: runner.status().len(),
        events: runner.status().recent(start, end),
    }))
}

/// Replace whatever the target is doing with a fresh build of the last
/// synced checkout if upstream is unreachable.
async fn rerun(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;

    request_rerun(&runner).await?;
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

/// Wipe the target's build repository and output in the background.
async fn clean_working_dir(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;

    request_clean(runner);
    Ok((StatusCode::ACCEPTED, Json(json!({ "status": "queued" }))))
}

pub(crate) async fn request_rerun(runner: &BuildRunner) -> Result<(), ApiError> {
    info!(target_name = %runner.name(), "Rerun requested");
    runner
        .build(BuildOptions {
            abort_running: true,
            ignore_pull_error: true,
            ..Default::default()
        })
        .await?;
    Ok(())
}

/// The cleanup waits for the running job, so it is not awaited here.
pub(crate) fn request_clean(runner: Arc<BuildRunner>) {
    info!(target_name = %runner.name(), "Working dir cleanup requested");
    tokio::spawn(async move {
        if let Err(e) = runner.clean_working_dir(true).await {
            error!(target_name = %runner.name(), error = %e, "Cleaning working dir failed");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::test_support::{json_body, send, state};
    use axum::body::Body;
    use axum::http::{Request, header};
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use sitehook_config::BasicAuth;
    use std::time::Duration;

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    fn fill(runner: &BuildRunner, count: usize) {
        for i in 0..count {
            runner
                .status()
                .append(true, format!("event {}", i), None, false);
        }
    }

    #[tokio::test]
    async fn test_overview_lists_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path(), None, None);
        fill(state.runner("site").unwrap(), 3);

        let (status, json) = json_body(send(&state, get("/status")).await).await;
        assert_eq!(status, StatusCode::OK);
        let targets = json.as_array().unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0]["name"], "site");
        assert_eq!(targets[0]["branch"], "master");
        assert_eq!(targets[0]["latest"]["message"], "event 2");
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_target_status_pages_newest_first() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path(), None, None);
        fill(state.runner("site").unwrap(), 10);

        let (status, json) = json_body(send(&state, get("/status/site?start=2&end=5")).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total"], 10);
        let messages: Vec<_> = json["events"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["message"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(messages, ["event 7", "event 6", "event 5"]);

        let (_, json) = json_body(send(&state, get("/status/site?start=-4&end=2")).await).await;
        assert_eq!(json["start"], 0);
        assert_eq!(json["events"].as_array().unwrap().len(), 2);

        let (_, json) = json_body(send(&state, get("/status/site")).await).await;
        assert_eq!(json["end"], 50);
        assert_eq!(json["events"].as_array().unwrap().len(), 10);

        let response = send(&state, get("/status/nope")).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_basic_auth_guards_target_views() {
        let tmp = tempfile::tempdir().unwrap();
        let auth = BasicAuth {
            user: "admin".to_string(),
            password: "hunter2".to_string(),
        };
        let state = state(tmp.path(), None, Some(auth));

        let response = send(&state, get("/status/site")).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().contains_key(header::WWW_AUTHENTICATE));

        let request = Request::get("/status/site")
            .header(
                header::AUTHORIZATION,
                format!("Basic {}", STANDARD.encode("admin:hunter2")),
            )
            .body(Body::empty())
            .unwrap();
        assert_eq!(send(&state, request).await.status(), StatusCode::OK);

        let response = send(&state, Request::post("/status/site/rerun").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // The overview stays public.
        assert_eq!(send(&state, get("/status")).await.status(), StatusCode::OK);
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_rerun_and_clean_are_queued() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path(), None, None);
        let runner = state.runner("site").unwrap().clone();

        let response = send(&state, Request::post("/status/site/rerun").body(Body::empty()).unwrap()).await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        while runner.status().latest().is_none_or(|s| s.running) {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        std::fs::create_dir_all(runner.target().output_path()).unwrap();
        let response = send(
            &state,
            Request::post("/status/site/clean_working_dir")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        while runner
            .status()
            .latest()
            .is_none_or(|s| s.message != "Working dir cleaned")
        {
            assert!(tokio::time::Instant::now() < deadline);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!runner.target().output_path().exists());
        state.shutdown().await;
    }

    #[tokio::test]
    async fn test_health() {
        let tmp = tempfile::tempdir().unwrap();
        let state = state(tmp.path(), None, None);
        let (status, json) = json_body(send(&state, get("/health")).await).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "ok");
        state.shutdown().await;
    }
}

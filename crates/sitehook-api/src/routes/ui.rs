//! UI routes serving HTML templates.

use askama::Template;
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::{Html, IntoResponse, Redirect};
use axum::routing::{get, post};
use sitehook_core::BuildStatus;
use sitehook_runner::BuildRunner;

use crate::AppState;
use crate::auth::require_basic_auth;
use crate::error::ApiError;
use crate::routes::status::{Range, find_runner, request_clean, request_rerun};

// ============================================================================
// Template structs
// ============================================================================

#[derive(Template)]
#[template(path = "pages/overview.html")]
struct OverviewTemplate {
    targets: Vec<TargetView>,
    has_targets: bool,
}

#[derive(Template)]
#[template(path = "pages/target.html")]
struct TargetTemplate {
    target: TargetView,
    clone_url: String,
    start: i64,
    end: i64,
    total: usize,
    events: Vec<EventView>,
    has_events: bool,
}

// ============================================================================
// View models
// ============================================================================

struct TargetView {
    name: String,
    branch: String,
    busy: bool,
    latest: Option<EventView>,
    schedules: Vec<ScheduleView>,
}

struct EventView {
    date: String,
    ago: String,
    message: String,
    ok: bool,
    running: bool,
    payload: String,
}

struct ScheduleView {
    name: String,
    schedule: String,
    next_run: String,
}

impl EventView {
    fn from_status(status: BuildStatus) -> Self {
        let payload = status
            .payload
            .and_then(|payload| serde_json::to_string_pretty(&payload).ok())
            .unwrap_or_default();
        Self {
            date: status.date.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
            ago: format_time_ago(status.date),
            message: status.message,
            ok: status.ok,
            running: status.running,
            payload,
        }
    }
}

fn target_view(state: &AppState, runner: &BuildRunner) -> TargetView {
    TargetView {
        name: runner.name().to_string(),
        branch: runner.branch().to_string(),
        busy: runner.is_busy(),
        latest: runner.status().latest().map(EventView::from_status),
        schedules: state
            .scheduler
            .jobs_for(runner.name())
            .into_iter()
            .map(|job| ScheduleView {
                name: job.name,
                schedule: job.build.schedule.to_string(),
                next_run: job
                    .next_run
                    .map(|at| at.format("%Y-%m-%d %H:%M:%S %Z").to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
            .collect(),
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(overview_page))
        .route("/{name}", get(target_page))
        .route("/{name}/rerun", post(rerun_action))
        .route("/{name}/clean_working_dir", post(clean_action))
}

// ============================================================================
// Page handlers
// ============================================================================

async fn overview_page(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let targets: Vec<_> = state
        .runners
        .values()
        .map(|runner| target_view(&state, runner))
        .collect();
    let has_targets = !targets.is_empty();
    render(&OverviewTemplate {
        targets,
        has_targets,
    })
}

async fn target_page(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(range): Query<Range>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;

    let (start, end) = range.clamped();
    let events: Vec<_> = runner
        .status()
        .recent(start, end)
        .into_iter()
        .map(EventView::from_status)
        .collect();
    let has_events = !events.is_empty();
    render(&TargetTemplate {
        target: target_view(&state, &runner),
        clone_url: runner.target().clone_url.clone(),
        start,
        end,
        total: runner.status().len(),
        events,
        has_events,
    })
}

// ============================================================================
// Form actions
// ============================================================================

async fn rerun_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect, ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;
    request_rerun(&runner).await?;
    Ok(Redirect::to(&format!("/ui/{}", name)))
}

async fn clean_action(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Redirect, ApiError> {
    require_basic_auth(&headers, state.status_auth.as_deref())?;
    let runner = find_runner(&state, &name)?;
    request_clean(runner);
    Ok(Redirect::to(&format!("/ui/{}", name)))
}

// ============================================================================
// Helpers
// ============================================================================

fn render(template: &impl Template) -> Result<Html<String>, ApiError> {
    match template.render() {
        Ok(html) => Ok(Html(html)),
        Err(e) => {
            tracing::error!("Template render error: {}", e);
            Err(ApiError::Internal(format!("Template error: {}", e)))
        }
    }
}

fn format_time_ago(time: chrono::DateTime<chrono::Utc>) -> String {
    let now = chrono::Utc::now();
    let duration = now.signed_duration_since(time);

    if duration.num_seconds() < 60 {
        format!("{}s ago", duration.num_seconds().max(0))
    } else if duration.num_minutes() < 60 {
        format!("{}m ago", duration.num_minutes())
    } else if duration.num_hours() < 24 {
        format!("{}h ago", duration.num_hours())
    } else {
        format!("{}d ago", duration.num_days())
    }
}

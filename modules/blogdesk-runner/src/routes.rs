use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, warn};

use blogdesk_activity::open_store;
use blogdesk_common::{ActivityQuery, ActivityStatus, ActivityType, Config, TaskStage};
use blogdesk_stream::event_stream_response;

use crate::auth::require_api_key;
use crate::error::RunnerError;
use crate::backend::TaskBackend;
use crate::runner::{RunnerSettings, TaskRunner};

pub struct RunnerState {
    pub runner: TaskRunner,
    /// When set, every route requires a matching `X-API-Key`.
    pub api_key: Option<String>,
}

impl RunnerState {
    /// Wire a runner from environment-derived configuration.
    pub async fn from_config(
        backend: Arc<dyn TaskBackend>,
        config: &Config,
    ) -> Result<Self, RunnerError> {
        let activity = open_store(config).await?;
        let settings = RunnerSettings::from_config(config);
        info!(
            evaluate_delay_secs = settings.evaluate_delay.as_secs(),
            auto_select_min_score = settings.auto_select_min_score,
            credential = config.admin_api_key.is_some(),
            "Task runner configured"
        );

        Ok(Self {
            runner: TaskRunner::new(backend, activity, settings),
            api_key: config.admin_api_key.clone(),
        })
    }
}

/// [`runner_router`] mounted under `prefix`.
///
/// The proxy forwards `{prefix}/...` unchanged, so the runner behind it must
/// be mounted under the same prefix (`/api` by default).
pub fn runner_router_at(prefix: &str, state: Arc<RunnerState>) -> Router {
    let prefix = prefix.trim_end_matches('/');
    if prefix.is_empty() {
        runner_router(state)
    } else {
        Router::new().nest(prefix, runner_router(state))
    }
}

pub fn runner_router(state: Arc<RunnerState>) -> Router {
    Router::new()
        .route("/tasks/{stage}", post(trigger_task))
        .route(
            "/tasks/pipeline/stream",
            get(pipeline_stream).post(pipeline_stream),
        )
        .route("/sources/evaluate/pending/stream", get(pending_evaluation_stream))
        .route("/activity-logs", get(list_activity_logs))
        .route("/activity-logs/recent", get(recent_activity_logs))
        .route("/activity-logs/cleanup", delete(cleanup_activity_logs))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key))
        .with_state(state)
}

// --- Query structs ---

#[derive(Deserialize)]
pub struct PageQuery {
    page: Option<u32>,
    page_size: Option<u32>,
    #[serde(rename = "type")]
    activity_type: Option<ActivityType>,
    status: Option<ActivityStatus>,
}

#[derive(Deserialize)]
pub struct CleanupQuery {
    days: Option<i64>,
}

// --- Helpers ---

pub(crate) fn detail(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(serde_json::json!({ "detail": message.into() }))).into_response()
}

// --- Handlers ---

async fn trigger_task(
    State(state): State<Arc<RunnerState>>,
    Path(stage): Path<String>,
) -> Response {
    let stage: TaskStage = match stage.parse() {
        Ok(stage) => stage,
        Err(e) => return detail(StatusCode::NOT_FOUND, e.to_string()),
    };

    match state.runner.trigger(stage).await {
        Ok(summary) => Json(summary).into_response(),
        Err(RunnerError::PipelineBusy) => {
            detail(StatusCode::CONFLICT, RunnerError::PipelineBusy.to_string())
        }
        Err(e) => {
            warn!(stage = %stage, error = %e, "Triggered task failed");
            detail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

async fn pipeline_stream(State(state): State<Arc<RunnerState>>) -> Response {
    info!("Pipeline progress stream opened");
    event_stream_response(state.runner.spawn_pipeline())
}

async fn pending_evaluation_stream(State(state): State<Arc<RunnerState>>) -> Response {
    info!("Pending evaluation stream opened");
    event_stream_response(state.runner.spawn_pending_evaluation())
}

async fn recent_activity_logs(
    State(state): State<Arc<RunnerState>>,
    Query(query): Query<ActivityQuery>,
) -> Response {
    match state.runner.activity().list_recent(&query).await {
        Ok(records) => Json(records).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to load recent activity logs");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load activity logs")
        }
    }
}

async fn list_activity_logs(
    State(state): State<Arc<RunnerState>>,
    Query(params): Query<PageQuery>,
) -> Response {
    let page = params.page.unwrap_or(1).max(1);
    let page_size = params.page_size.unwrap_or(50);

    match state
        .runner
        .activity()
        .list_page(page, page_size, params.activity_type, params.status)
        .await
    {
        Ok(page) => Json(page).into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to list activity logs");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to load activity logs")
        }
    }
}

async fn cleanup_activity_logs(
    State(state): State<Arc<RunnerState>>,
    Query(params): Query<CleanupQuery>,
) -> Response {
    let days = params.days.unwrap_or(30).clamp(1, 365);
    let cutoff = Utc::now() - Duration::days(days);

    match state.runner.activity().delete_older_than(cutoff).await {
        Ok(deleted) => {
            info!(days, deleted, "Cleaned up activity logs");
            Json(serde_json::json!({
                "message": format!("Deleted {deleted} logs older than {days} days"),
                "deleted_count": deleted,
            }))
            .into_response()
        }
        Err(e) => {
            warn!(error = %e, "Failed to clean up activity logs");
            detail(StatusCode::INTERNAL_SERVER_ERROR, "Failed to clean up activity logs")
        }
    }
}

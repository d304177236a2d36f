use std::sync::Arc;

use axum::{extract::State, Json};
use mr_reviewer::{TaskFilter, TaskState};
use serde::Serialize;
use tracing::instrument;

use crate::core::app_state::AppState;
use crate::core::http::response_envelope::ApiResponse;

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_seconds: u64,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub reviewed_commits_tracked: usize,
}

/// `GET /status`. Aggregate counters over the supervisor's active table and
/// history ring, plus process uptime. Cheap: no network calls.
#[instrument(name = "status_route", skip(state))]
pub async fn status_route(State(state): State<Arc<AppState>>) -> Json<ApiResponse<StatusResponse>> {
    let tasks = state.app.supervisor.list_tasks(&TaskFilter::default());

    let mut active = 0;
    let mut completed = 0;
    let mut failed = 0;
    let mut cancelled = 0;
    for task in &tasks {
        match task.state {
            TaskState::Pending | TaskState::Running => active += 1,
            TaskState::Completed => completed += 1,
            TaskState::Failed => failed += 1,
            TaskState::Cancelled => cancelled += 1,
        }
    }

    let commit_stats = state.app.commit_tracker.stats();

    Json(ApiResponse::success(StatusResponse {
        uptime_seconds: state.uptime_seconds(),
        active,
        completed,
        failed,
        cancelled,
        reviewed_commits_tracked: commit_stats.entries,
    }))
}

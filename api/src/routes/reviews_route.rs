use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    Json,
};
use chrono::{DateTime, Utc};
use mr_reviewer::{MergeRequestRef, ReviewOptions, ReviewResult, TaskState};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::core::app_state::AppState;
use crate::core::http::response_envelope::ApiResponse;
use crate::error_handler::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct TriggerReviewRequest {
    pub project_id: String,
    pub mr_iid: u64,
    #[serde(default)]
    pub force_review: bool,
}

#[derive(Serialize)]
pub struct TriggerReviewResponse {
    pub task_id: String,
    pub status: &'static str,
}

/// `POST /reviews`. The manual-trigger counterpart to the webhook: same
/// admission path through `TaskSupervisor`, no Forge-event filtering.
#[instrument(name = "trigger_review_route", skip(state, body))]
pub async fn trigger_review_route(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TriggerReviewRequest>,
) -> AppResult<Response> {
    let mr_ref = MergeRequestRef::new(body.project_id, body.mr_iid);
    let options: ReviewOptions = state.app.default_review_options();

    let task_id = state
        .app
        .supervisor
        .submit(mr_ref, None, options, body.force_review)
        .map_err(AppError::from)?;

    info!(task_id = %task_id, "manual review trigger admitted");

    Ok(ApiResponse::success(TriggerReviewResponse {
        task_id,
        status: "accepted",
    })
    .into_response_with_status(StatusCode::ACCEPTED))
}

#[derive(Serialize)]
pub struct TokenUsageDto {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

#[derive(Serialize)]
pub struct ReviewStatsDto {
    pub files_reviewed: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub comments_generated: usize,
    pub tokens: TokenUsageDto,
}

#[derive(Serialize)]
pub struct ReviewResultDto {
    pub status: &'static str,
    pub processing_time_ms: u128,
    pub stats: ReviewStatsDto,
    pub message: String,
}

impl From<&ReviewResult> for ReviewResultDto {
    fn from(r: &ReviewResult) -> Self {
        ReviewResultDto {
            status: match r.status {
                mr_reviewer::ReviewStatus::Success => "success",
                mr_reviewer::ReviewStatus::EmptySuccess => "empty_success",
            },
            processing_time_ms: r.processing_time.as_millis(),
            stats: ReviewStatsDto {
                files_reviewed: r.stats.files_reviewed,
                chunks_processed: r.stats.chunks_processed,
                chunks_failed: r.stats.chunks_failed,
                comments_generated: r.stats.comments_generated,
                tokens: TokenUsageDto {
                    prompt_tokens: r.stats.tokens.prompt_tokens,
                    completion_tokens: r.stats.tokens.completion_tokens,
                    total_tokens: r.stats.tokens.total_tokens,
                },
            },
            message: r.message.clone(),
        }
    }
}

fn task_state_str(state: TaskState) -> &'static str {
    match state {
        TaskState::Pending => "pending",
        TaskState::Running => "running",
        TaskState::Completed => "completed",
        TaskState::Failed => "failed",
        TaskState::Cancelled => "cancelled",
    }
}

#[derive(Serialize)]
pub struct TaskStatusResponse {
    pub task_id: String,
    pub status: &'static str,
    pub progress: f64,
    pub message: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<ReviewResultDto>,
    pub error: Option<String>,
}

/// `GET /reviews/{task_id}`. Consults the supervisor's active table then its
/// bounded history ring; unknown ids surface as 404 via the standard error
/// taxonomy.
#[instrument(name = "get_review_task_route", skip(state))]
pub async fn get_review_task_route(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<String>,
) -> AppResult<Json<ApiResponse<TaskStatusResponse>>> {
    let task = state.app.supervisor.get_task(&task_id).map_err(AppError::from)?;

    Ok(Json(ApiResponse::success(TaskStatusResponse {
        task_id: task.task_id,
        status: task_state_str(task.state),
        progress: task.progress,
        message: task.message,
        started_at: task.started_at,
        completed_at: task.completed_at,
        result: task.result.as_ref().map(ReviewResultDto::from),
        error: task.error,
    })))
}

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::Response,
};
use serde::Serialize;
use tracing::{info, instrument};

use crate::core::app_state::AppState;
use crate::core::http::response_envelope::ApiResponse;
use crate::webhook::{self, DispatchOutcome};

#[derive(Serialize)]
struct AcceptedBody {
    task_id: String,
    status: &'static str,
}

#[derive(Serialize)]
struct IgnoredBody {
    message: String,
}

/// `POST /webhook`. Never blocks on the review itself: it hands admitted
/// merge-request events to the supervisor and returns immediately with a
/// task handle.
#[instrument(name = "webhook_route", skip(state, headers, body))]
pub async fn webhook_route(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let token = headers
        .get("X-Gitlab-Token")
        .and_then(|h| h.to_str().ok());
    let event = headers
        .get("X-Gitlab-Event")
        .and_then(|h| h.to_str().ok());

    let outcome = webhook::dispatch(&state.app, token, event, &body).await;

    match outcome {
        DispatchOutcome::Disabled => ApiResponse::success(IgnoredBody {
            message: "webhooks are disabled".to_string(),
        })
        .into_response_with_status(StatusCode::OK),

        DispatchOutcome::Unauthorized => {
            ApiResponse::<()>::error("BAD_TOKEN", "missing or invalid webhook token", Vec::new())
                .into_response_with_status(StatusCode::UNAUTHORIZED)
        }

        DispatchOutcome::Malformed(reason) => {
            ApiResponse::<()>::error("MALFORMED_PAYLOAD", reason, Vec::new())
                .into_response_with_status(StatusCode::BAD_REQUEST)
        }

        DispatchOutcome::Ignored(reason) => {
            info!(reason = %reason, "webhook event ignored");
            ApiResponse::success(IgnoredBody { message: reason })
                .into_response_with_status(StatusCode::OK)
        }

        DispatchOutcome::Accepted(task_id) => {
            info!(task_id = %task_id, "webhook admitted a review task");
            ApiResponse::success(AcceptedBody {
                task_id,
                status: "accepted",
            })
            .into_response_with_status(StatusCode::ACCEPTED)
        }

        DispatchOutcome::Saturated => ApiResponse::<()>::error(
            "TOO_MANY_REVIEWS",
            "too many concurrent reviews",
            Vec::new(),
        )
        .into_response_with_status(StatusCode::TOO_MANY_REQUESTS),

        DispatchOutcome::NoteResolved => ApiResponse::success(IgnoredBody {
            message: "discussion resolved".to_string(),
        })
        .into_response_with_status(StatusCode::OK),

        DispatchOutcome::NoteResolveFailed(reason) => {
            ApiResponse::<()>::error("FORGE_ERROR", reason, Vec::new())
                .into_response_with_status(StatusCode::BAD_GATEWAY)
        }

        DispatchOutcome::InternalError(reason) => {
            ApiResponse::<()>::error("UNEXPECTED", reason, Vec::new())
                .into_response_with_status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

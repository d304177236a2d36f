use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::Utc;
use serde::Serialize;

use crate::core::app_state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: chrono::DateTime<Utc>,
}

/// `GET /health`. Unwrapped, envelope-free body: load balancers expect a
/// flat shape, not `{success, data, error}`.
pub async fn health_route(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_seconds: state.uptime_seconds(),
        timestamp: Utc::now(),
    })
}

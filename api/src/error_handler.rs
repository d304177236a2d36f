use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use mr_reviewer::errors::{
    ConcurrencyLimitError, ConfigError, DedupError, ForgeError, LlmError, ParseError,
    WebhookError,
};
use mr_reviewer::Error as CoreError;
use thiserror::Error;

use crate::core::http::response_envelope::ApiResponse;

/// Public application error type. Wraps the full `mr_reviewer::Error`
/// hierarchy for pipeline failures and adds the handful of edge-only
/// failure modes (routing, binding, env) that never occur below the HTTP
/// boundary.
#[derive(Debug, Error)]
pub enum AppError {
    // --- Boot / config ---
    #[error("missing required environment variable: {0}")]
    MissingEnv(&'static str),

    #[error(transparent)]
    Core(#[from] CoreError),

    // --- IO / network / server ---
    #[error("failed to bind listener")]
    Bind(#[source] std::io::Error),

    #[error("server error")]
    Server(#[source] std::io::Error),

    // --- Request / routing ---
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,

    /// Rich HTTP error for cases the pipeline's own taxonomy doesn't cover
    /// (route-level precondition failures).
    #[error("{message}")]
    Http {
        status: StatusCode,
        code: &'static str,
        message: String,
    },
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::MissingEnv(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Bind(_) | AppError::Server(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Http { status, .. } => *status,
            AppError::Core(e) => core_status(e),
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            AppError::MissingEnv(_) => "MISSING_ENV",
            AppError::Bind(_) => "BIND_ERROR",
            AppError::Server(_) => "SERVER_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound => "NOT_FOUND",
            AppError::Http { code, .. } => code,
            AppError::Core(e) => core_code(e),
        }
    }
}

/// Maps the pipeline's typed error hierarchy onto a fixed HTTP status, per
/// the error-handling design's taxonomy. Every terminal `mr_reviewer::Error`
/// variant gets exactly one status; nothing here branches on message text.
fn core_status(err: &CoreError) -> StatusCode {
    match err {
        CoreError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
        CoreError::Webhook(WebhookError::BadToken) => StatusCode::UNAUTHORIZED,
        CoreError::Webhook(_) => StatusCode::BAD_REQUEST,
        CoreError::Concurrency(ConcurrencyLimitError::TooManyReviews { .. }) => {
            StatusCode::TOO_MANY_REQUESTS
        }
        CoreError::Concurrency(ConcurrencyLimitError::UnknownTask(_)) => StatusCode::NOT_FOUND,
        CoreError::Concurrency(_) => StatusCode::CONFLICT,
        CoreError::Dedup(DedupError::MissingCommitSha) => StatusCode::BAD_REQUEST,
        CoreError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        CoreError::Forge(e) => forge_status(e),
        CoreError::Llm(e) => llm_status(e),
        CoreError::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn forge_status(err: &ForgeError) -> StatusCode {
    match err {
        ForgeError::Unauthorized => StatusCode::UNAUTHORIZED,
        ForgeError::Forbidden => StatusCode::FORBIDDEN,
        ForgeError::NotFound => StatusCode::NOT_FOUND,
        ForgeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ForgeError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ForgeError::Server(_) | ForgeError::Network(_) | ForgeError::RetryExhausted { .. } => {
            StatusCode::BAD_GATEWAY
        }
        ForgeError::PositionRejected { .. }
        | ForgeError::HttpStatus(_)
        | ForgeError::Serde(_)
        | ForgeError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

fn llm_status(err: &LlmError) -> StatusCode {
    match err {
        LlmError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        LlmError::HttpStatus { .. } | LlmError::Network(_) | LlmError::RetryExhausted { .. } => {
            StatusCode::BAD_GATEWAY
        }
        LlmError::TokenLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        LlmError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

fn core_code(err: &CoreError) -> &'static str {
    match err {
        CoreError::Config(ConfigError::MissingEnv(_)) => "MISSING_ENV",
        CoreError::Config(_) => "CONFIG_ERROR",
        CoreError::Webhook(WebhookError::BadToken) => "BAD_TOKEN",
        CoreError::Webhook(WebhookError::MalformedPayload(_)) => "MALFORMED_PAYLOAD",
        CoreError::Webhook(WebhookError::MissingEventHeader) => "MISSING_EVENT_HEADER",
        CoreError::Concurrency(ConcurrencyLimitError::TooManyReviews { .. }) => "TOO_MANY_REVIEWS",
        CoreError::Concurrency(ConcurrencyLimitError::AlreadyReviewed { .. }) => "ALREADY_REVIEWED",
        CoreError::Concurrency(ConcurrencyLimitError::AlreadyActive { .. }) => "ALREADY_ACTIVE",
        CoreError::Concurrency(ConcurrencyLimitError::ShuttingDown) => "SHUTTING_DOWN",
        CoreError::Concurrency(ConcurrencyLimitError::UnknownTask(_)) => "UNKNOWN_TASK",
        CoreError::Dedup(_) => "DEDUP_ERROR",
        CoreError::Parse(ParseError::InvalidHunkHeader { .. }) => "INVALID_HUNK_HEADER",
        CoreError::Parse(_) => "DIFF_PARSE_ERROR",
        CoreError::Validation(_) => "VALIDATION_ERROR",
        CoreError::Timeout(_) => "TIMEOUT",
        CoreError::Forge(_) => "FORGE_ERROR",
        CoreError::Llm(LlmError::TokenLimit { .. }) => "TOKEN_LIMIT",
        CoreError::Llm(_) => "LLM_ERROR",
        CoreError::Unexpected(_) => "UNEXPECTED",
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ApiResponse::<()>::error(self.error_code(), self.to_string(), Vec::new());
        body.into_response_with_status(status)
    }
}

/// Handy result alias used across handlers.
pub type AppResult<T> = Result<T, AppError>;

/// Optional: convert common Axum rejections to `AppError`.
impl From<axum::extract::rejection::JsonRejection> for AppError {
    fn from(err: axum::extract::rejection::JsonRejection) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

impl From<axum::extract::rejection::QueryRejection> for AppError {
    fn from(err: axum::extract::rejection::QueryRejection) -> Self {
        AppError::BadRequest(err.to_string())
    }
}

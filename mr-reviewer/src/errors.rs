//! Crate-wide error hierarchy for mr-reviewer.
//!
//! Goals:
//! - Single root `Error` for all public functions.
//! - Provider-aware mapping (401→Unauthorized, 429→RateLimited, 5xx→Server, etc.).
//! - No dynamic dispatch, no async-trait, ergonomic `?` via `From` impls.
//! - Typed `PositionRejected` so the publisher branches on a variant, never on a message.

use thiserror::Error;

/// Convenient alias for crate-wide results.
pub type MrResult<T> = Result<T, Error>;

/// Root error type for the mr-reviewer crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Forge (GitLab/GitHub/Bitbucket) API failure.
    #[error(transparent)]
    Forge(#[from] ForgeError),

    /// LLM chat-completion failure.
    #[error(transparent)]
    Llm(#[from] LlmError),

    /// Unified diff parsing failure. Aborts the single review, not the process.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Configuration problems (bad/missing tokens, base URL, etc.). Terminates the process at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Webhook validation/parsing failure.
    #[error(transparent)]
    Webhook(#[from] WebhookError),

    /// Admission was rejected by the supervisor or dispatcher.
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyLimitError),

    /// Deduplication cleanup precondition not met.
    #[error(transparent)]
    Dedup(#[from] DedupError),

    /// A deadline elapsed somewhere in the pipeline.
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Input validation errors (bad IDs, unsupported flavors, etc.).
    #[error("validation error: {0}")]
    Validation(String),

    /// Narrowly-typed "unexpected" bucket. Recorded with its origin, never a stringified
    /// catch-all: callers should prefer a specific variant above when one fits.
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Forge (GitLab-shaped) API error, carrying status and endpoint where known.
#[derive(Debug, Error)]
pub enum ForgeError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found")]
    NotFound,

    #[error("rate limited")]
    RateLimited { retry_after_secs: Option<u64> },

    #[error("server error: status {0}")]
    Server(u16),

    /// A 400 response recognized as a rejected inline position (line_code missing/invalid).
    /// The publisher branches on this variant, never on the response body text.
    #[error("position rejected by forge: {reason}")]
    PositionRejected { reason: String },

    /// Other HTTP status (4xx/3xx) not covered above.
    #[error("http status error: {0}")]
    HttpStatus(u16),

    #[error("timeout")]
    Timeout,

    /// Network/transport failure without status (DNS/connect/reset).
    #[error("network error: {0}")]
    Network(String),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },
}

impl ForgeError {
    /// Transport errors and 5xx/429 are retriable by policy; everything else is terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            ForgeError::Timeout
                | ForgeError::Network(_)
                | ForgeError::RateLimited { .. }
                | ForgeError::Server(_)
        )
    }
}

/// LLM chat-completion error. Carries the status (if any) and whether a caller may retry.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("http status error: {status}")]
    HttpStatus { status: u16, retriable: bool },

    #[error("network error: {0}")]
    Network(String),

    #[error("timeout")]
    Timeout,

    #[error("chunk exceeds configured token budget: {estimated} > {budget}")]
    TokenLimit { estimated: usize, budget: usize },

    #[error("malformed response: {0}")]
    InvalidResponse(String),

    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: String },
}

impl LlmError {
    pub fn is_retriable(&self) -> bool {
        match self {
            LlmError::HttpStatus { retriable, .. } => *retriable,
            LlmError::Network(_) | LlmError::Timeout => true,
            LlmError::TokenLimit { .. }
            | LlmError::InvalidResponse(_)
            | LlmError::RetryExhausted { .. } => false,
        }
    }
}

/// Unified diff parser errors.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("{file}:{line_no}: invalid hunk header: {excerpt}")]
    InvalidHunkHeader {
        file: String,
        line_no: usize,
        excerpt: String,
    },

    #[error("{file}: bookkeeping diverged from declared hunk counts at line {line_no}: {excerpt}")]
    BookkeepingMismatch {
        file: String,
        line_no: usize,
        excerpt: String,
    },

    #[error("unexpected end of input in {0}")]
    UnexpectedEof(String),
}

/// Configuration and setup errors (base API URL, missing token, etc.). Fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("invalid base api url: {0}")]
    InvalidBaseUrl(String),

    #[error("invalid pattern {pattern}: {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Webhook validation/parsing errors, mapped to fixed HTTP codes at the edge.
#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing or invalid webhook token")]
    BadToken,

    #[error("malformed JSON payload: {0}")]
    MalformedPayload(String),

    #[error("missing event-kind header")]
    MissingEventHeader,
}

/// Deduplication cleanup precondition not met.
#[derive(Debug, Error)]
pub enum DedupError {
    /// `delete_outdated` requires a `current_commit_sha`, mirroring the
    /// Python original's `raise` on the same missing precondition.
    #[error("delete_outdated strategy requires current_commit_sha")]
    MissingCommitSha,
}

/// Admission rejected: too many concurrent reviews, or the slot is saturated.
#[derive(Debug, Error)]
pub enum ConcurrencyLimitError {
    #[error("too many concurrent reviews: {running}/{max}")]
    TooManyReviews { running: usize, max: usize },

    #[error("commit {commit_sha} for {project}:{mr_iid} already reviewed")]
    AlreadyReviewed {
        project: String,
        mr_iid: u64,
        commit_sha: String,
    },

    #[error("a review is already active for {project}:{mr_iid}")]
    AlreadyActive { project: String, mr_iid: u64 },

    #[error("supervisor is shutting down, no new tasks are admitted")]
    ShuttingDown,

    #[error("unknown task id: {0}")]
    UnknownTask(String),
}

// ===== Conversions for `?` ergonomics =====

impl From<reqwest::Error> for ForgeError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return ForgeError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            return match code {
                401 => ForgeError::Unauthorized,
                403 => ForgeError::Forbidden,
                404 => ForgeError::NotFound,
                429 => ForgeError::RateLimited {
                    retry_after_secs: None,
                },
                500..=599 => ForgeError::Server(code),
                _ => ForgeError::HttpStatus(code),
            };
        }
        ForgeError::Network(e.to_string())
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return LlmError::Timeout;
        }
        if let Some(status) = e.status() {
            let code = status.as_u16();
            let retriable = code == 429 || (500..=599).contains(&code);
            return LlmError::HttpStatus {
                status: code,
                retriable,
            };
        }
        LlmError::Network(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Forge(ForgeError::from(e))
    }
}

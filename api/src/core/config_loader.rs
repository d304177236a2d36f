//! Reads the process environment once at startup and assembles the
//! `mr_reviewer::Config` value every component is built from. `mr-reviewer`
//! itself never touches `std::env` — this is the one place that does.

use std::env;
use std::time::Duration;

use mr_reviewer::config::{
    BranchPatterns, ChunkerConfig, Config, DeduplicationStrategy, FilePatterns, RetryConfig,
    SchedulingConfig, TokenEstimationRatios, WebhookConfig,
};
use mr_reviewer::errors::{ConfigError, MrResult};

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> MrResult<T> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key: key.to_string(), value: raw }.into()),
        Err(_) => Ok(default),
    }
}

fn env_list(key: &str) -> Vec<String> {
    env::var(key)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default()
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(raw) => matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"),
        Err(_) => default,
    }
}

fn env_secs(key: &str, default_secs: u64) -> MrResult<Duration> {
    Ok(Duration::from_secs(env_parse(key, default_secs)?))
}

/// Loads every environment variable named in the external-interfaces
/// section, falling back to the same defaults `mr_reviewer::config`'s
/// `Default` impls use. Returns before any network client is constructed,
/// so a bad value here is a fast, pre-bind failure.
pub fn load_config() -> MrResult<Config> {
    let ignore_patterns = {
        let extra = env_list("IGNORE_FILE_PATTERNS");
        if extra.is_empty() {
            mr_reviewer::config::default_ignore_patterns()
        } else {
            extra
        }
    };
    let prioritize_patterns = {
        let extra = env_list("PRIORITIZE_FILE_PATTERNS");
        if extra.is_empty() {
            mr_reviewer::config::default_prioritize_patterns()
        } else {
            extra
        }
    };
    let patterns = FilePatterns::compile(&ignore_patterns, &prioritize_patterns)?;

    let retry = RetryConfig {
        max_retries: env_parse("MAX_RETRIES", 3)?,
        base_delay: env_secs("RETRY_DELAY", 1)?,
        max_delay: Duration::from_secs(30),
        backoff_factor: env_parse("RETRY_BACKOFF_FACTOR", 2.0)?,
    };

    let scheduling = SchedulingConfig {
        max_concurrent_reviews: env_parse("MAX_CONCURRENT_REVIEWS", 3)?,
        concurrent_glm_requests: env_parse("CONCURRENT_GLM_REQUESTS", 3)?,
        api_request_delay: Duration::from_millis(env_parse("API_REQUEST_DELAY", 500)?),
        review_timeout: env_secs("REVIEW_TIMEOUT_SECONDS", 600)?,
        chunk_timeout: env_secs("CHUNK_TIMEOUT", 120)?,
        gitlab_timeout: env_secs("GITLAB_TIMEOUT", 30)?,
        glm_timeout: env_secs("GLM_TIMEOUT", 60)?,
        task_history_size: env_parse("TASK_HISTORY_SIZE", 100)?,
        shutdown_grace_period: env_secs("SHUTDOWN_GRACE_PERIOD", 30)?,
    };

    let chunker = ChunkerConfig {
        max_chunk_tokens: mr_reviewer::config::DEFAULT_MAX_CHUNK_TOKENS,
        max_diff_size: env_parse("MAX_DIFF_SIZE", 1_000_000)?,
        max_files_per_comment: env_parse("MAX_FILES_PER_COMMENT", 10)?,
        max_chunks: match env::var("MAX_CHUNKS") {
            Ok(raw) => Some(
                raw.parse()
                    .map_err(|_| ConfigError::InvalidValue { key: "MAX_CHUNKS".into(), value: raw })?,
            ),
            Err(_) => None,
        },
        token_ratios: TokenEstimationRatios::default(),
        patterns,
    };

    let branch_patterns = BranchPatterns::compile(
        &env_list("WEBHOOK_ALLOWED_SOURCE_BRANCHES"),
        &env_list("WEBHOOK_ALLOWED_TARGET_BRANCHES"),
        &env_list("WEBHOOK_EXCLUDED_SOURCE_BRANCHES"),
        &env_list("WEBHOOK_EXCLUDED_TARGET_BRANCHES"),
    )?;

    let webhook_actions = {
        let configured = env_list("WEBHOOK_TRIGGER_ACTIONS");
        if configured.is_empty() {
            vec!["open".to_string(), "update".to_string(), "reopen".to_string()]
        } else {
            configured
        }
    };

    let webhook = WebhookConfig {
        enabled: env_bool("WEBHOOK_ENABLED", true),
        secret: env_opt_string("WEBHOOK_SECRET"),
        allowed_mr_actions: webhook_actions,
        skip_draft: env_bool("WEBHOOK_SKIP_DRAFT", true),
        skip_wip: env_bool("WEBHOOK_SKIP_WIP", true),
        required_labels: env_list("WEBHOOK_REQUIRED_LABELS"),
        excluded_labels: env_list("WEBHOOK_EXCLUDED_LABELS"),
        branch_patterns,
    };

    Ok(Config {
        gitlab_api_url: env_string("GITLAB_API_URL", "https://gitlab.com/api/v4"),
        gitlab_token: env_string("GITLAB_TOKEN", ""),

        glm_api_url: env_string("GLM_API_URL", ""),
        glm_api_key: env_string("GLM_API_KEY", ""),
        glm_model: env_string("GLM_MODEL", "glm-4"),
        glm_temperature: env_parse("GLM_TEMPERATURE", 0.2)?,
        glm_max_tokens: env_parse("GLM_MAX_TOKENS", 4096)?,

        scheduling,
        chunker,
        retry,
        webhook,

        deduplication_enabled: env_bool("DEDUPLICATION_ENABLED", true),
        dedup_strategy: env_opt_string("DEDUPLICATION_STRATEGY")
            .and_then(|s| DeduplicationStrategy::parse(&s))
            .unwrap_or(DeduplicationStrategy::DeleteSummaryOnly),
        commit_ttl: env_secs("COMMIT_TTL_SECONDS", 86_400)?,
        bot_username: env_string("BOT_USERNAME", "mr-reviewer-bot"),
        bot_user_id: env::var("BOT_USER_ID").ok().and_then(|v| v.parse().ok()),
    })
}

/// Default `(project_id, mr_iid)` for manual/CLI-style invocation, read from
/// the CI-provided variables when running inside a GitLab CI job.
pub fn default_ci_target() -> Option<(String, u64)> {
    let project = env::var("CI_PROJECT_ID").ok()?;
    let iid = env::var("CI_MERGE_REQUEST_IID").ok()?.parse().ok()?;
    Some((project, iid))
}

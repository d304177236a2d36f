//! Process-wide configuration, assembled once at startup and passed by
//! reference into every component. No component re-reads the environment;
//! only the binary edge (outside this crate) parses `std::env`.

use std::time::Duration;

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

use crate::errors::{ConfigError, MrResult};

/// Ratio applied to `content.len()` to estimate a token count, by coarse content kind.
#[derive(Debug, Clone, Copy)]
pub struct TokenEstimationRatios {
    pub code: f64,
    pub text: f64,
    pub diff: f64,
}

impl Default for TokenEstimationRatios {
    fn default() -> Self {
        // 1 token per ~4 chars of code, ~1.33 chars of English text; diff markers
        // inflate the character count relative to content, hence the lower ratio.
        TokenEstimationRatios {
            code: 0.25,
            text: 0.75,
            diff: 0.30,
        }
    }
}

/// Retry/backoff knobs shared by ForgeClient and LLMClient.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
        }
    }
}

/// Dedup/cleanup policy applied to a bot's prior notes before a new review publishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeduplicationStrategy {
    DeleteAll,
    DeleteSummaryOnly,
    KeepAll,
    /// Reserved for future per-commit tagging; currently behaves exactly like
    /// `DeleteAll` (see DESIGN.md). Requires `current_commit_sha` to be supplied.
    DeleteOutdated,
}

impl DeduplicationStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "delete_all" => Some(Self::DeleteAll),
            "delete_summary_only" => Some(Self::DeleteSummaryOnly),
            "keep_all" => Some(Self::KeepAll),
            "delete_outdated" => Some(Self::DeleteOutdated),
            _ => None,
        }
    }
}

/// Glob-based file filter, compiled once, reused for every review.
#[derive(Debug, Clone)]
pub struct FilePatterns {
    pub ignore: GlobSet,
    pub prioritize: GlobSet,
}

impl FilePatterns {
    pub fn compile(ignore: &[String], prioritize: &[String]) -> MrResult<Self> {
        Ok(FilePatterns {
            ignore: build_globset(ignore)?,
            prioritize: build_globset(prioritize)?,
        })
    }

    pub fn is_ignored(&self, path: &str) -> bool {
        self.ignore.is_match(path)
    }

    pub fn is_prioritized(&self, path: &str) -> bool {
        self.prioritize.is_match(path)
    }
}

fn build_globset(patterns: &[String]) -> MrResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for p in patterns {
        let glob = Glob::new(p).map_err(|e| ConfigError::InvalidPattern {
            pattern: p.clone(),
            reason: e.to_string(),
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| ConfigError::InvalidPattern {
            pattern: patterns.join(","),
            reason: e.to_string(),
        })
        .map_err(Into::into)
}

/// Branch-name allow/deny filter, regex-compiled once at construction.
#[derive(Debug, Clone)]
pub struct BranchPatterns {
    pub allowed_source: Vec<Regex>,
    pub allowed_target: Vec<Regex>,
    pub excluded_source: Vec<Regex>,
    pub excluded_target: Vec<Regex>,
}

impl BranchPatterns {
    pub fn compile(
        allowed_source: &[String],
        allowed_target: &[String],
        excluded_source: &[String],
        excluded_target: &[String],
    ) -> MrResult<Self> {
        Ok(BranchPatterns {
            allowed_source: compile_all(allowed_source)?,
            allowed_target: compile_all(allowed_target)?,
            excluded_source: compile_all(excluded_source)?,
            excluded_target: compile_all(excluded_target)?,
        })
    }
}

fn compile_all(patterns: &[String]) -> MrResult<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| {
                ConfigError::InvalidPattern {
                    pattern: p.clone(),
                    reason: e.to_string(),
                }
                .into()
            })
        })
        .collect()
}

/// Webhook acceptance configuration (C10).
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub enabled: bool,
    pub secret: Option<String>,
    pub allowed_mr_actions: Vec<String>,
    pub skip_draft: bool,
    pub skip_wip: bool,
    pub required_labels: Vec<String>,
    pub excluded_labels: Vec<String>,
    pub branch_patterns: BranchPatterns,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        WebhookConfig {
            enabled: true,
            secret: None,
            allowed_mr_actions: vec!["open".into(), "update".into(), "reopen".into()],
            skip_draft: true,
            skip_wip: true,
            required_labels: Vec::new(),
            excluded_labels: Vec::new(),
            branch_patterns: BranchPatterns {
                allowed_source: Vec::new(),
                allowed_target: Vec::new(),
                excluded_source: Vec::new(),
                excluded_target: Vec::new(),
            },
        }
    }
}

/// Scheduling / concurrency knobs (C8/C9/C5).
#[derive(Debug, Clone)]
pub struct SchedulingConfig {
    pub max_concurrent_reviews: usize,
    pub concurrent_glm_requests: usize,
    pub api_request_delay: Duration,
    pub review_timeout: Duration,
    pub chunk_timeout: Duration,
    pub gitlab_timeout: Duration,
    pub glm_timeout: Duration,
    pub task_history_size: usize,
    pub shutdown_grace_period: Duration,
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        SchedulingConfig {
            max_concurrent_reviews: 3,
            concurrent_glm_requests: 3,
            api_request_delay: Duration::from_millis(500),
            review_timeout: Duration::from_secs(600),
            chunk_timeout: Duration::from_secs(120),
            gitlab_timeout: Duration::from_secs(30),
            glm_timeout: Duration::from_secs(60),
            task_history_size: 100,
            shutdown_grace_period: Duration::from_secs(30),
        }
    }
}

/// DiffParser chunking bounds (C3).
#[derive(Debug, Clone)]
pub struct ChunkerConfig {
    pub max_chunk_tokens: usize,
    pub max_diff_size: usize,
    pub max_files_per_comment: usize,
    pub max_chunks: Option<usize>,
    pub token_ratios: TokenEstimationRatios,
    pub patterns: FilePatterns,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        ChunkerConfig {
            max_chunk_tokens: DEFAULT_MAX_CHUNK_TOKENS,
            max_diff_size: 1_000_000,
            max_files_per_comment: 10,
            max_chunks: None,
            token_ratios: TokenEstimationRatios::default(),
            patterns: FilePatterns::compile(&default_ignore_patterns(), &default_prioritize_patterns())
                .expect("default glob patterns always compile"),
        }
    }
}

/// Upper bound on a single chunk's estimated tokens, absent an explicit override.
pub const DEFAULT_MAX_CHUNK_TOKENS: usize = 50_000;

/// Reserved for future context-line trimming around a hunk; not yet consumed
/// by any operation.
pub const DEFAULT_CONTEXT_LINES: usize = 3;

/// File count shown in end-of-review summary statistics ("top N largest
/// files changed"); does not affect chunk admission.
pub const TOP_LARGEST_FILES_COUNT: usize = 5;

/// Relative ordering used when multiple critiques target the same line;
/// intentionally skips 2, preserved from the source this was ported from.
pub mod priority_values {
    pub const HIGH: i32 = 0;
    pub const NORMAL: i32 = 1;
    pub const LOW: i32 = 3;
}

/// Tie-break ordering among files changed the same way, used only by summary
/// statistics ("N modified, M added, ...").
pub mod change_type_priority {
    pub const MODIFIED: i32 = 0;
    pub const ADDED: i32 = 1;
    pub const RENAMED: i32 = 2;
    pub const DELETED: i32 = 3;
}

/// The single immutable configuration value threaded through every component.
/// Built once at process startup by the `api` crate; `mr-reviewer` never reads
/// environment variables directly.
#[derive(Debug, Clone)]
pub struct Config {
    pub gitlab_api_url: String,
    pub gitlab_token: String,

    pub glm_api_url: String,
    pub glm_api_key: String,
    pub glm_model: String,
    pub glm_temperature: f64,
    pub glm_max_tokens: usize,

    pub scheduling: SchedulingConfig,
    pub chunker: ChunkerConfig,
    pub retry: RetryConfig,
    pub webhook: WebhookConfig,

    pub deduplication_enabled: bool,
    /// Cleanup policy applied to a bot's prior notes before a new review
    /// publishes. Not named by an environment variable in the distilled
    /// spec; defaults to `DeleteSummaryOnly` (see DESIGN.md) and is
    /// overridable via `DEDUPLICATION_STRATEGY`.
    pub dedup_strategy: DeduplicationStrategy,
    pub commit_ttl: Duration,
    pub bot_username: String,
    /// Numeric author id of the bot account, when known. `CommentTracker`
    /// matches bot authorship by id OR username — either is sufficient,
    /// since some Forge responses only populate one reliably.
    pub bot_user_id: Option<u64>,
}

impl Config {
    /// Validates cross-field invariants that a naive env-parse wouldn't catch.
    pub fn validate(&self) -> MrResult<()> {
        if self.gitlab_token.trim().is_empty() {
            return Err(ConfigError::MissingEnv("GITLAB_TOKEN".into()).into());
        }
        if self.glm_api_key.trim().is_empty() {
            return Err(ConfigError::MissingEnv("GLM_API_KEY".into()).into());
        }
        if !(0.0..=1.0).contains(&self.glm_temperature) {
            return Err(ConfigError::InvalidValue {
                key: "GLM_TEMPERATURE".into(),
                value: self.glm_temperature.to_string(),
            }
            .into());
        }
        if !self.gitlab_api_url.starts_with("http://") && !self.gitlab_api_url.starts_with("https://")
        {
            return Err(ConfigError::InvalidBaseUrl(self.gitlab_api_url.clone()).into());
        }
        Ok(())
    }
}

/// Default ignore patterns: generated/binary/lockfile artifacts never worth reviewing.
pub fn default_ignore_patterns() -> Vec<String> {
    [
        "*.min.js",
        "*.min.css",
        "*.css.map",
        "*.js.map",
        "package-lock.json",
        "yarn.lock",
        "*.png",
        "*.jpg",
        "*.jpeg",
        "*.gif",
        "*.pdf",
        "*.zip",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Default prioritize patterns: mainstream source-file extensions go first in a chunk batch.
pub fn default_prioritize_patterns() -> Vec<String> {
    [
        "*.py", "*.js", "*.ts", "*.tsx", "*.jsx", "*.go", "*.rs", "*.java", "*.cpp", "*.c", "*.h",
        "*.hpp", "*.cs", "*.php",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Coarse content kind used to pick a token-estimation ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Code,
    Text,
    Diff,
}

/// Maps a file extension to a coarse language tag, used only to decide whether
/// `ContentKind::Code` or `ContentKind::Text` applies during token estimation.
pub fn language_for_extension(ext: &str) -> Option<&'static str> {
    Some(match ext {
        "py" => "python",
        "js" => "javascript",
        "ts" => "typescript",
        "jsx" => "javascript",
        "tsx" => "typescript",
        "java" => "java",
        "go" => "go",
        "rs" => "rust",
        "cpp" => "cpp",
        "c" => "c",
        "h" => "c",
        "cs" => "csharp",
        "php" => "php",
        "rb" => "ruby",
        "swift" => "swift",
        "kt" => "kotlin",
        "scala" => "scala",
        "sh" => "shell",
        "sql" => "sql",
        "html" => "html",
        "css" => "css",
        "scss" => "scss",
        "sass" => "sass",
        "less" => "less",
        "xml" => "xml",
        "yaml" => "yaml",
        "yml" => "yaml",
        "json" => "json",
        "md" => "markdown",
        "rst" => "rst",
        "dockerfile" => "dockerfile",
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_patterns_ignore_lockfiles() {
        let fp = FilePatterns::compile(&default_ignore_patterns(), &default_prioritize_patterns())
            .unwrap();
        assert!(fp.is_ignored("yarn.lock"));
        assert!(fp.is_ignored("dist/app.min.js"));
        assert!(!fp.is_ignored("src/main.rs"));
    }

    #[test]
    fn file_patterns_prioritize_source_files() {
        let fp = FilePatterns::compile(&default_ignore_patterns(), &default_prioritize_patterns())
            .unwrap();
        assert!(fp.is_prioritized("src/lib.rs"));
        assert!(!fp.is_prioritized("README.md"));
    }

    #[test]
    fn dedup_strategy_parses_known_values() {
        assert_eq!(
            DeduplicationStrategy::parse("delete_all"),
            Some(DeduplicationStrategy::DeleteAll)
        );
        assert_eq!(
            DeduplicationStrategy::parse("KEEP_ALL"),
            Some(DeduplicationStrategy::KeepAll)
        );
        assert_eq!(DeduplicationStrategy::parse("bogus"), None);
    }
}

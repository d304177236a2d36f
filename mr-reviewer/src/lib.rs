//! Automated code-review orchestration for a GitLab-shaped Forge.
//!
//! A webhook-triggered merge request flows: fetch diff (`forge`) → parse +
//! chunk (`parser`) → map accepted inline-comment positions (`linemap`) →
//! critique each chunk with an LLM (`llm`, fanned out by `review`) → publish
//! inline/general comments (`publish`), guarded by commit/comment
//! deduplication (`dedup`). `orchestrator` wires one review's worth of that
//! pipeline together; `supervisor` is the process-wide admission and
//! lifecycle layer above it. `config` and `errors` are the ambient stack
//! every other module depends on.
//!
//! This crate never reads `std::env` or binds a socket — that's the `api`
//! crate's job. `mr-reviewer` is pure pipeline.

pub mod config;
pub mod dedup;
pub mod errors;
pub mod forge;
pub mod linemap;
pub mod llm;
pub mod orchestrator;
pub mod parser;
pub mod publish;
pub mod retry;
pub mod review;
pub mod supervisor;
pub mod task;

pub use config::Config;
pub use errors::{Error, MrResult};
pub use forge::types::MergeRequestRef;
pub use orchestrator::{ReviewOptions, ReviewOrchestrator, ReviewResult, ReviewStatus};
pub use supervisor::TaskSupervisor;
pub use task::{ReviewTask, TaskFilter, TaskState};

use std::sync::Arc;

use dedup::{CommentTracker, CommitTracker};
use forge::{ProviderClient, ProviderConfig, ProviderKind};
use llm::LlmClient;

/// Every long-lived, shared component the `api` crate's handlers need,
/// constructed once at process startup from a single `Config`.
pub struct Application {
    pub config: Config,
    pub forge: Arc<ProviderClient>,
    pub llm: Arc<LlmClient>,
    pub commit_tracker: Arc<CommitTracker>,
    pub comment_tracker: Arc<CommentTracker>,
    pub supervisor: Arc<TaskSupervisor>,
}

impl Application {
    /// Validates `config`, then builds every component in dependency order:
    /// forge + LLM clients, the two dedup trackers, the orchestrator that
    /// wires them together, and finally the supervisor that schedules it.
    pub fn new(config: Config) -> MrResult<Self> {
        config.validate()?;

        let forge = Arc::new(ProviderClient::from_config(ProviderConfig {
            kind: ProviderKind::GitLab,
            base_api: config.gitlab_api_url.clone(),
            token: config.gitlab_token.clone(),
            retry: config.retry.clone(),
        })?);

        let http = reqwest::Client::builder()
            .user_agent("mr-reviewer/0.1")
            .build()
            .map_err(errors::ForgeError::from)?;
        let llm = Arc::new(LlmClient::new(
            http,
            config.glm_api_url.clone(),
            config.glm_api_key.clone(),
            config.glm_model.clone(),
            config.glm_temperature,
            config.glm_max_tokens,
            config.retry.clone(),
        ));

        let commit_tracker = Arc::new(CommitTracker::new(config.commit_ttl));
        let comment_tracker = Arc::new(CommentTracker::new(
            config.bot_username.clone(),
            config.bot_user_id,
        ));

        let orchestrator = Arc::new(ReviewOrchestrator::new(
            forge.clone(),
            llm.clone(),
            commit_tracker.clone(),
            comment_tracker.clone(),
            &config,
        ));

        let supervisor = TaskSupervisor::new(orchestrator, commit_tracker.clone(), &config);

        Ok(Application {
            config,
            forge,
            llm,
            commit_tracker,
            comment_tracker,
            supervisor,
        })
    }

    /// Default review options for a webhook-triggered submission: the
    /// configured dedup policy, general review, no extra instructions.
    pub fn default_review_options(&self) -> ReviewOptions {
        ReviewOptions::from_config(&self.config)
    }
}

//! ReviewOrchestrator (C8): the one-shot pipeline that drives C1–C7 for a
//! single merge request. `run` is the sole public entry point.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::{ChunkerConfig, Config, DeduplicationStrategy};
use crate::dedup::{CommentTracker, CommitTracker};
use crate::errors::{Error, MrResult};
use crate::forge::types::MergeRequestRef;
use crate::forge::ProviderClient;
use crate::linemap::LineMapper;
use crate::llm::{LlmClient, ReviewType, TokenUsage};
use crate::parser::{self};
use crate::publish::{CommentBatch, CommentPublisher};
use crate::review::ChunkProcessor;

/// Per-run knobs the caller (webhook dispatcher, manual trigger, CLI) may
/// override; everything else comes from `Config`.
#[derive(Debug, Clone)]
pub struct ReviewOptions {
    pub review_type: ReviewType,
    pub extra_instructions: Option<String>,
    pub dedup_enabled: bool,
    pub dedup_strategy: DeduplicationStrategy,
}

impl ReviewOptions {
    pub fn from_config(cfg: &Config) -> Self {
        ReviewOptions {
            review_type: ReviewType::General,
            extra_instructions: None,
            dedup_enabled: cfg.deduplication_enabled,
            dedup_strategy: cfg.dedup_strategy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewStatus {
    /// The pipeline ran to completion and published (possibly zero)
    /// comments.
    Success,
    /// No chunks remained after filtering (e.g. every changed file was
    /// ignored, or `max_chunks = 0`); nothing was fetched-from-LLM or
    /// published beyond the fetch+parse steps.
    EmptySuccess,
}

#[derive(Debug, Clone, Default)]
pub struct ReviewStats {
    pub files_reviewed: usize,
    pub chunks_processed: usize,
    pub chunks_failed: usize,
    pub comments_generated: usize,
    pub tokens: TokenUsage,
}

#[derive(Debug, Clone)]
pub struct ReviewResult {
    pub status: ReviewStatus,
    pub processing_time: Duration,
    pub stats: ReviewStats,
    pub message: String,
}

/// Drives C1–C7 for a single merge request. Cheap to construct: it holds
/// only shared `Arc` handles, so a fresh orchestrator per task is the norm.
pub struct ReviewOrchestrator {
    forge: Arc<ProviderClient>,
    llm: Arc<LlmClient>,
    commit_tracker: Arc<CommitTracker>,
    comment_tracker: Arc<CommentTracker>,
    chunker: ChunkerConfig,
    gitlab_timeout: Duration,
    chunk_timeout: Duration,
    glm_timeout: Duration,
    concurrent_glm_requests: usize,
    api_request_delay: Duration,
}

impl ReviewOrchestrator {
    pub fn new(
        forge: Arc<ProviderClient>,
        llm: Arc<LlmClient>,
        commit_tracker: Arc<CommitTracker>,
        comment_tracker: Arc<CommentTracker>,
        config: &Config,
    ) -> Self {
        ReviewOrchestrator {
            forge,
            llm,
            commit_tracker,
            comment_tracker,
            chunker: config.chunker.clone(),
            gitlab_timeout: config.scheduling.gitlab_timeout,
            chunk_timeout: config.scheduling.chunk_timeout,
            glm_timeout: config.scheduling.glm_timeout,
            concurrent_glm_requests: config.scheduling.concurrent_glm_requests,
            api_request_delay: config.scheduling.api_request_delay,
        }
    }

    /// Runs the full fetch → parse → chunk → analyze → dedupe → publish
    /// pipeline for one merge request. Steps 1-10 of SPEC_FULL §4.7.
    #[tracing::instrument(skip(self, options), fields(project = %mr_ref.project_id, mr_iid = mr_ref.mr_iid))]
    pub async fn run(&self, mr_ref: MergeRequestRef, options: ReviewOptions) -> MrResult<ReviewResult> {
        let t0 = Instant::now();
        let project_id = mr_ref.project_id.clone();
        let mr_iid = mr_ref.mr_iid;

        // Step 1: fetch MR metadata and raw diffs concurrently.
        let (metadata, raw_diffs) = tokio::try_join!(
            self.with_timeout(self.forge.fetch_mr_metadata(&project_id, mr_iid)),
            self.with_timeout(self.forge.fetch_raw_diffs(&project_id, mr_iid)),
        )?;

        // Step 2: parse diffs into FileDiffs; compute summary stats.
        let files = parser::parse_all(&raw_diffs)?;
        let files_reviewed = files.len();
        tracing::info!(files_reviewed, "parsed diff into file list");

        // Step 3: build LineMapper over the raw diffs.
        let mut mapper = LineMapper::new();
        mapper.build(&raw_diffs);

        // Step 4: filter + chunk (ignore/prioritize patterns, token budget,
        // `max_chunks` truncation all live inside `build_chunks`).
        let chunks = parser::build_chunks(files, &self.chunker);

        // Step 5: empty-chunk early return.
        if chunks.is_empty() {
            return Ok(ReviewResult {
                status: ReviewStatus::EmptySuccess,
                processing_time: t0.elapsed(),
                stats: ReviewStats {
                    files_reviewed,
                    ..Default::default()
                },
                message: "no chunks to review after filtering".to_string(),
            });
        }

        // Step 6: run ChunkProcessor to obtain all critiques plus token totals.
        let processor = ChunkProcessor::new(self.llm.clone(), self.concurrent_glm_requests);
        let (critiques, chunk_stats) = processor
            .process(
                &chunks,
                options.review_type,
                options.extra_instructions.as_deref(),
                self.glm_timeout,
                self.chunk_timeout,
            )
            .await;

        // Step 7: conditional dedup cleanup. Failures are logged, never fatal.
        if options.dedup_enabled {
            match self
                .comment_tracker
                .cleanup_old_comments(
                    &self.forge,
                    &project_id,
                    mr_iid,
                    options.dedup_strategy,
                    Some(metadata.diff_refs.head_sha.as_str()),
                )
                .await
            {
                Ok(result) => tracing::info!(
                    deleted = result.deleted,
                    failed = result.failed,
                    kept = result.kept,
                    "comment cleanup finished"
                ),
                Err(err) => tracing::warn!(error = %err, "comment cleanup failed; publishing anyway"),
            }
        }

        // Step 8: format + publish.
        let batch = CommentBatch::from_critiques(critiques);
        let comments_generated = batch.inline_comments.len() + batch.file_comments.len();
        let publisher = CommentPublisher::new(self.forge.clone(), self.api_request_delay);
        publisher
            .publish(&project_id, mr_iid, &metadata.diff_refs, &mapper, &batch)
            .await?;

        // Step 9: mark reviewed.
        self.commit_tracker.mark_reviewed(
            &project_id,
            mr_iid,
            &metadata.diff_refs.head_sha,
            comments_generated,
        );

        // Step 10: return result.
        Ok(ReviewResult {
            status: ReviewStatus::Success,
            processing_time: t0.elapsed(),
            stats: ReviewStats {
                files_reviewed,
                chunks_processed: chunk_stats.chunks_succeeded,
                chunks_failed: chunk_stats.chunks_failed,
                comments_generated,
                tokens: chunk_stats.tokens,
            },
            message: format!(
                "reviewed {files_reviewed} file(s) across {} chunk(s), {comments_generated} comment(s) published",
                chunk_stats.chunks_total
            ),
        })
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = MrResult<T>>,
    ) -> MrResult<T> {
        match tokio::time::timeout(self.gitlab_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(self.gitlab_timeout)),
        }
    }
}

//! ChunkProcessor (C5): fans `[DiffChunk]` out to the LLM client under a
//! concurrency bound, preserving chunk-index order in the merged result. A
//! single chunk's failure (error or timeout) contributes zero critiques and
//! zero tokens and is counted, but never aborts the batch.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::llm::{Critique, LlmClient, ReviewType, TokenUsage};
use crate::parser::{render_chunk_text, DiffChunk};

/// Aggregate statistics surfaced to the orchestrator's end-of-review report.
#[derive(Debug, Clone, Default)]
pub struct ChunkProcessingStats {
    pub chunks_total: usize,
    pub chunks_succeeded: usize,
    pub chunks_failed: usize,
    pub tokens: TokenUsage,
}

pub struct ChunkProcessor {
    llm: Arc<LlmClient>,
    concurrency: usize,
}

impl ChunkProcessor {
    pub fn new(llm: Arc<LlmClient>, concurrency: usize) -> Self {
        ChunkProcessor {
            llm,
            concurrency: concurrency.max(1),
        }
    }

    /// Runs up to `concurrency` chunk analyses in parallel. Each chunk gets
    /// its own `chunk_timeout` deadline wrapping the whole call (including
    /// LLMClient's internal retries); `glm_timeout` is the per-HTTP-call
    /// deadline passed straight through to `LlmClient::review_chunk`.
    #[tracing::instrument(skip(self, chunks, extra_instructions), fields(chunk_count = chunks.len()))]
    pub async fn process(
        &self,
        chunks: &[DiffChunk],
        review_type: ReviewType,
        extra_instructions: Option<&str>,
        glm_timeout: Duration,
        chunk_timeout: Duration,
    ) -> (Vec<Critique>, ChunkProcessingStats) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let extra = extra_instructions.map(|s| s.to_string());

        let mut handles = Vec::with_capacity(chunks.len());
        for (index, chunk) in chunks.iter().enumerate() {
            let llm = self.llm.clone();
            let sem = semaphore.clone();
            let text = render_chunk_text(chunk);
            let extra = extra.clone();

            handles.push(tokio::spawn(async move {
                let _permit = sem.acquire_owned().await.expect("semaphore never closed");
                let outcome = tokio::time::timeout(
                    chunk_timeout,
                    llm.review_chunk(&text, extra.as_deref(), review_type, glm_timeout),
                )
                .await;
                (index, outcome)
            }));
        }

        let mut ordered: Vec<Option<crate::llm::CritiqueResponse>> =
            (0..chunks.len()).map(|_| None).collect();
        let mut stats = ChunkProcessingStats {
            chunks_total: chunks.len(),
            ..Default::default()
        };

        for handle in handles {
            match handle.await {
                Ok((index, Ok(Ok(response)))) => {
                    stats.chunks_succeeded += 1;
                    stats.tokens.prompt_tokens += response.usage.prompt_tokens;
                    stats.tokens.completion_tokens += response.usage.completion_tokens;
                    stats.tokens.total_tokens += response.usage.total_tokens;
                    ordered[index] = Some(response);
                }
                Ok((index, Ok(Err(err)))) => {
                    stats.chunks_failed += 1;
                    tracing::warn!(
                        chunk_index = index,
                        error = %err,
                        "chunk analysis failed; contributing zero critiques"
                    );
                }
                Ok((index, Err(_elapsed))) => {
                    stats.chunks_failed += 1;
                    tracing::warn!(
                        chunk_index = index,
                        timeout = ?chunk_timeout,
                        "chunk analysis timed out; contributing zero critiques"
                    );
                }
                Err(join_err) => {
                    stats.chunks_failed += 1;
                    tracing::error!(error = %join_err, "chunk analysis task panicked or was cancelled");
                }
            }
        }

        let critiques = ordered
            .into_iter()
            .flatten()
            .flat_map(|r| r.comments)
            .collect();

        (critiques, stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::time::Duration as StdDuration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn make_chunk(text: &str) -> DiffChunk {
        let files = crate::parser::parse_all(&[crate::forge::types::RawFileDiff {
            old_path: "a.py".into(),
            new_path: "a.py".into(),
            is_new: false,
            is_deleted: false,
            is_renamed: false,
            diff: Some(text.to_string()),
        }])
        .unwrap();
        DiffChunk {
            files,
            estimated_tokens: 10,
        }
    }

    #[tokio::test]
    async fn merges_critiques_in_chunk_index_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "{\"comments\":[{\"file\":\"a.py\",\"line\":1,\"comment\":\"x\",\"type\":\"issue\",\"severity\":\"low\"}]}"}}],
                "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
            })))
            .mount(&server)
            .await;

        let llm = Arc::new(crate::llm::LlmClient::new(
            reqwest::Client::new(),
            server.uri(),
            "key".into(),
            "model".into(),
            0.2,
            1000,
            RetryConfig {
                max_retries: 1,
                base_delay: StdDuration::from_millis(1),
                max_delay: StdDuration::from_millis(5),
                backoff_factor: 1.0,
            },
        ));

        let processor = ChunkProcessor::new(llm, 2);
        let chunks = vec![
            make_chunk("@@ -1,1 +1,1 @@\n+a\n"),
            make_chunk("@@ -1,1 +1,1 @@\n+b\n"),
        ];
        let (critiques, stats) = processor
            .process(
                &chunks,
                ReviewType::General,
                None,
                StdDuration::from_secs(5),
                StdDuration::from_secs(5),
            )
            .await;

        assert_eq!(stats.chunks_total, 2);
        assert_eq!(stats.chunks_succeeded, 2);
        assert_eq!(stats.chunks_failed, 0);
        assert_eq!(critiques.len(), 2);
        assert_eq!(stats.tokens.total_tokens, 30);
    }

    #[tokio::test]
    async fn isolates_a_single_chunk_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let llm = Arc::new(crate::llm::LlmClient::new(
            reqwest::Client::new(),
            server.uri(),
            "key".into(),
            "model".into(),
            0.2,
            1000,
            RetryConfig {
                max_retries: 1,
                base_delay: StdDuration::from_millis(1),
                max_delay: StdDuration::from_millis(5),
                backoff_factor: 1.0,
            },
        ));

        let processor = ChunkProcessor::new(llm, 1);
        let chunks = vec![make_chunk("@@ -1,1 +1,1 @@\n+a\n")];
        let (critiques, stats) = processor
            .process(
                &chunks,
                ReviewType::General,
                None,
                StdDuration::from_secs(5),
                StdDuration::from_secs(5),
            )
            .await;

        assert!(critiques.is_empty());
        assert_eq!(stats.chunks_failed, 1);
        assert_eq!(stats.chunks_succeeded, 0);
    }
}

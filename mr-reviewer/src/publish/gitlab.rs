//! The concrete `CommentPublisher`: drives `ProviderClient` through the
//! summary/inline/general publish protocol, pacing successive calls by
//! `api_request_delay`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::errors::{ForgeError, MrResult};
use crate::forge::types::DiscussionPosition;
use crate::forge::{DiffRefs, ProviderClient};
use crate::linemap::LineMapper;

use super::{format_comment, CommentBatch, FormattedComment, PublishReport, SUMMARY_BANNER};

/// Publishes a `CommentBatch` for one review. Owned per-review: pacing state
/// is internal, so different reviews publish independently of each other.
pub struct CommentPublisher {
    forge: Arc<ProviderClient>,
    api_request_delay: Duration,
    last_publish: Mutex<Option<Instant>>,
}

impl CommentPublisher {
    pub fn new(forge: Arc<ProviderClient>, api_request_delay: Duration) -> Self {
        CommentPublisher {
            forge,
            api_request_delay,
            last_publish: Mutex::new(None),
        }
    }

    /// Sleeps, if needed, so consecutive publish calls are separated by at
    /// least `api_request_delay`. Process-wide pacing is achieved by every
    /// review owning its own `CommentPublisher`, each serializing its own
    /// calls through this single await point.
    async fn pace(&self) {
        let mut last = self.last_publish.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < self.api_request_delay {
                tokio::time::sleep(self.api_request_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    #[tracing::instrument(skip(self, mapper, batch), fields(project = project_id, mr_iid))]
    pub async fn publish(
        &self,
        project_id: &str,
        mr_iid: u64,
        diff_refs: &DiffRefs,
        mapper: &LineMapper,
        batch: &CommentBatch,
    ) -> MrResult<PublishReport> {
        let mut report = PublishReport::default();

        if let Some(summary) = &batch.summary {
            self.pace().await;
            let body = format!("{SUMMARY_BANNER}\n\n{summary}");
            self.forge.post_note(project_id, mr_iid, &body).await?;
            report.summary_posted = true;
        }

        // File-name order, then original batch order within a file. Inline
        // candidates are considered before file-level ones for a given file
        // name since that's the order they were produced in; `sort_by` is
        // stable so relative order within a file name is preserved.
        let mut items: Vec<&FormattedComment> = Vec::with_capacity(
            batch.inline_comments.len() + batch.file_comments.len(),
        );
        items.extend(batch.inline_comments.iter());
        items.extend(batch.file_comments.iter());
        items.sort_by(|a, b| {
            let fa = a.file.as_deref().unwrap_or("");
            let fb = b.file.as_deref().unwrap_or("");
            fa.cmp(fb)
        });

        for fc in items {
            self.pace().await;
            match (&fc.file, fc.line) {
                (Some(file), Some(line)) => {
                    self.publish_inline_with_fallback(
                        project_id, mr_iid, diff_refs, mapper, file, line, fc, &mut report,
                    )
                    .await?;
                }
                _ => {
                    let body = format_comment(fc);
                    self.forge.post_note(project_id, mr_iid, &body).await?;
                    report.general_posted += 1;
                }
            }
        }

        Ok(report)
    }

    /// Implements §4.5 step 3: skip the inline attempt entirely (and post a
    /// general note) when the line isn't part of the diff; attempt the
    /// inline post otherwise; fall back to a general note when the Forge
    /// recognizes the position as rejected. Any other error propagates.
    #[allow(clippy::too_many_arguments)]
    async fn publish_inline_with_fallback(
        &self,
        project_id: &str,
        mr_iid: u64,
        diff_refs: &DiffRefs,
        mapper: &LineMapper,
        file: &str,
        line: u32,
        fc: &FormattedComment,
        report: &mut PublishReport,
    ) -> MrResult<()> {
        if !mapper.is_valid(file, line) {
            let body = format!(
                "{}\n\n_intended for `{file}:{line}`, but that line is not part of the diff_",
                format_comment(fc)
            );
            self.forge.post_note(project_id, mr_iid, &body).await?;
            report.general_posted += 1;
            report.fallback_count += 1;
            return Ok(());
        }

        let info = mapper
            .info(file, line)
            .expect("is_valid confirmed an entry exists");
        let old_path = mapper.old_path(file).unwrap_or(file);
        let start_sha = diff_refs
            .start_sha
            .as_deref()
            .unwrap_or(diff_refs.base_sha.as_str());

        let position = DiscussionPosition {
            base_sha: &diff_refs.base_sha,
            start_sha,
            head_sha: &diff_refs.head_sha,
            position_type: "text",
            old_path,
            new_path: file,
            old_line: info.old_line,
            new_line: Some(info.new_line),
            line_code: &info.line_code,
        };

        let body = format_comment(fc);
        match self
            .forge
            .post_discussion(project_id, mr_iid, &body, &position)
            .await
        {
            Ok(_discussion_id) => {
                report.inline_posted += 1;
                Ok(())
            }
            Err(crate::errors::Error::Forge(ForgeError::PositionRejected { .. })) => {
                let fallback_body = format!(
                    "{body}\n\n_intended for `{file}:{line}`, but the Forge rejected the inline position_"
                );
                self.forge.post_note(project_id, mr_iid, &fallback_body).await?;
                report.general_posted += 1;
                report.fallback_count += 1;
                Ok(())
            }
            Err(other) => Err(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::forge::{ProviderConfig, ProviderKind};
    use crate::llm::{Critique, CritiqueKind, Severity};
    use crate::publish::CommentBatch;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn mapper_with_one_added_line() -> LineMapper {
        let mut mapper = LineMapper::new();
        mapper.build(&[crate::forge::types::RawFileDiff {
            old_path: "".into(),
            new_path: "new.py".into(),
            is_new: true,
            is_deleted: false,
            is_renamed: false,
            diff: Some("@@ -0,0 +1,3 @@\n+a\n+b\n+c\n".into()),
        }]);
        mapper
    }

    async fn client(server: &MockServer) -> Arc<ProviderClient> {
        Arc::new(
            ProviderClient::from_config(ProviderConfig {
                kind: ProviderKind::GitLab,
                base_api: server.uri(),
                token: "t".into(),
                retry: RetryConfig {
                    max_retries: 1,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(5),
                    backoff_factor: 1.0,
                },
            })
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn inline_comment_on_added_line_posts_discussion_only() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(
                "/projects/p1/merge_requests/5/discussions",
            ))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": "d1"})))
            .mount(&server)
            .await;

        let forge = client(&server).await;
        let publisher = CommentPublisher::new(forge, Duration::from_millis(0));
        let mapper = mapper_with_one_added_line();
        let diff_refs = DiffRefs {
            base_sha: "base".into(),
            start_sha: Some("start".into()),
            head_sha: "head".into(),
        };
        let batch = CommentBatch::from_critiques(vec![Critique {
            file: Some("new.py".into()),
            line: Some(2),
            comment: "x".into(),
            kind: CritiqueKind::Suggestion,
            severity: Severity::Low,
        }]);

        let report = publisher
            .publish("p1", 5, &diff_refs, &mapper, &batch)
            .await
            .unwrap();

        assert_eq!(report.inline_posted, 1);
        assert_eq!(report.general_posted, 0);
        assert_eq!(report.fallback_count, 0);
    }

    #[tokio::test]
    async fn line_outside_diff_posts_general_note_with_annotation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/p1/merge_requests/5/notes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 99})))
            .mount(&server)
            .await;

        let forge = client(&server).await;
        let publisher = CommentPublisher::new(forge, Duration::from_millis(0));
        let mapper = mapper_with_one_added_line();
        let diff_refs = DiffRefs {
            base_sha: "base".into(),
            start_sha: Some("start".into()),
            head_sha: "head".into(),
        };
        let batch = CommentBatch::from_critiques(vec![Critique {
            file: Some("new.py".into()),
            line: Some(50),
            comment: "x".into(),
            kind: CritiqueKind::Suggestion,
            severity: Severity::Low,
        }]);

        let report = publisher
            .publish("p1", 5, &diff_refs, &mapper, &batch)
            .await
            .unwrap();

        assert_eq!(report.inline_posted, 0);
        assert_eq!(report.general_posted, 1);
        assert_eq!(report.fallback_count, 1);
    }

    #[tokio::test]
    async fn rejected_position_falls_back_to_general_note() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/projects/p1/merge_requests/5/discussions"))
            .respond_with(ResponseTemplate::new(400).set_body_string("line_code can't be blank"))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/projects/p1/merge_requests/5/notes"))
            .respond_with(ResponseTemplate::new(201).set_body_json(serde_json::json!({"id": 1})))
            .mount(&server)
            .await;

        let forge = client(&server).await;
        let publisher = CommentPublisher::new(forge, Duration::from_millis(0));
        let mapper = mapper_with_one_added_line();
        let diff_refs = DiffRefs {
            base_sha: "base".into(),
            start_sha: Some("start".into()),
            head_sha: "head".into(),
        };
        let batch = CommentBatch::from_critiques(vec![Critique {
            file: Some("new.py".into()),
            line: Some(2),
            comment: "x".into(),
            kind: CritiqueKind::Suggestion,
            severity: Severity::Low,
        }]);

        let report = publisher
            .publish("p1", 5, &diff_refs, &mapper, &batch)
            .await
            .unwrap();

        assert_eq!(report.inline_posted, 0);
        assert_eq!(report.general_posted, 1);
        assert_eq!(report.fallback_count, 1);
    }
}

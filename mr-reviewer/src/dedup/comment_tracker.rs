//! CommentTracker: lists the bot's prior notes on an MR and applies a
//! cleanup policy before a new review publishes. Restores the full surface
//! of the original `comment_tracker.py` — `get_bot_comments` plus
//! `cleanup_old_comments` — that the distilled spec summarized to a single
//! bullet.

use crate::config::DeduplicationStrategy;
use crate::errors::{DedupError, MrResult};
use crate::forge::ProviderClient;

/// One prior note authored by the bot, as surfaced to the cleanup pass.
#[derive(Debug, Clone)]
pub struct TrackedComment {
    pub comment_id: u64,
    pub note_id: u64,
    pub discussion_id: Option<String>,
    pub body: String,
    pub author: String,
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    pub is_inline: bool,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
}

/// Outcome of a cleanup pass, built incrementally with `add_success` /
/// `add_failure` / `add_kept`, mirroring the Python dataclass's methods.
#[derive(Debug, Clone, Default)]
pub struct DeduplicationResult {
    pub deleted: usize,
    pub failed: usize,
    pub kept: usize,
    pub errors: Vec<String>,
}

impl DeduplicationResult {
    pub fn add_success(&mut self) {
        self.deleted += 1;
    }

    pub fn add_failure(&mut self, reason: impl Into<String>) {
        self.failed += 1;
        self.errors.push(reason.into());
    }

    pub fn add_kept(&mut self) {
        self.kept += 1;
    }
}

pub struct CommentTracker {
    bot_username: String,
    bot_user_id: Option<u64>,
}

impl CommentTracker {
    pub fn new(bot_username: String, bot_user_id: Option<u64>) -> Self {
        CommentTracker {
            bot_username,
            bot_user_id,
        }
    }

    fn is_bot_author(&self, author_id: u64, author_username: &str) -> bool {
        Some(author_id) == self.bot_user_id || author_username == self.bot_username
    }

    /// Fetches notes and discussions, filters out system notes, matches bot
    /// authorship by id OR username, and partitions the result into summary
    /// notes (plain MR notes) and inline-discussion notes.
    pub async fn get_bot_comments(
        &self,
        forge: &ProviderClient,
        project_id: &str,
        mr_iid: u64,
    ) -> MrResult<Vec<TrackedComment>> {
        let mut out = Vec::new();

        let notes = forge.list_notes(project_id, mr_iid).await?;
        for n in notes {
            if n.system || !self.is_bot_author(n.author.id, &n.author.username) {
                continue;
            }
            out.push(TrackedComment {
                comment_id: n.id,
                note_id: n.id,
                discussion_id: None,
                body: n.body,
                author: n.author.username,
                created_at: n.created_at,
                is_inline: false,
                file_path: None,
                line_number: None,
            });
        }

        let discussions = forge.list_discussions(project_id, mr_iid).await?;
        for d in discussions {
            if d.individual_note {
                // Already covered by the plain notes listing above.
                continue;
            }
            let Some(first) = d.notes.first() else {
                continue;
            };
            if first.system || !self.is_bot_author(first.author.id, &first.author.username) {
                continue;
            }
            out.push(TrackedComment {
                comment_id: first.id,
                note_id: first.id,
                discussion_id: Some(d.id),
                body: first.body.clone(),
                author: first.author.username.clone(),
                created_at: first.created_at,
                is_inline: true,
                file_path: None,
                line_number: None,
            });
        }

        Ok(out)
    }

    /// Applies `strategy` to the bot's prior comments. Per-note deletion
    /// failures never abort the pass: they are recorded in `errors` and
    /// counted in `failed`, and the new review still publishes.
    pub async fn cleanup_old_comments(
        &self,
        forge: &ProviderClient,
        project_id: &str,
        mr_iid: u64,
        strategy: DeduplicationStrategy,
        current_commit_sha: Option<&str>,
    ) -> MrResult<DeduplicationResult> {
        if strategy == DeduplicationStrategy::KeepAll {
            // No-op: no network calls, nothing kept/deleted/failed.
            return Ok(DeduplicationResult::default());
        }

        if strategy == DeduplicationStrategy::DeleteOutdated && current_commit_sha.is_none() {
            return Err(DedupError::MissingCommitSha.into());
        }

        let comments = self.get_bot_comments(forge, project_id, mr_iid).await?;
        let mut result = DeduplicationResult::default();

        for comment in comments {
            let should_delete = match strategy {
                DeduplicationStrategy::KeepAll => unreachable!("handled above"),
                DeduplicationStrategy::DeleteAll | DeduplicationStrategy::DeleteOutdated => true,
                DeduplicationStrategy::DeleteSummaryOnly => !comment.is_inline,
            };

            if !should_delete {
                result.add_kept();
                continue;
            }

            let outcome = if comment.is_inline {
                let discussion_id = comment.discussion_id.as_deref().unwrap_or_default();
                forge
                    .delete_discussion_note(project_id, mr_iid, discussion_id, comment.note_id)
                    .await
            } else {
                forge.delete_note(project_id, mr_iid, comment.note_id).await
            };

            match outcome {
                Ok(()) => result.add_success(),
                Err(e) => {
                    tracing::warn!(
                        note_id = comment.note_id,
                        error = %e,
                        "failed to delete bot comment during cleanup"
                    );
                    result.add_failure(e.to_string());
                }
            }
        }

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedup_result_accumulates() {
        let mut r = DeduplicationResult::default();
        r.add_success();
        r.add_success();
        r.add_failure("boom");
        r.add_kept();
        assert_eq!(r.deleted, 2);
        assert_eq!(r.failed, 1);
        assert_eq!(r.kept, 1);
        assert_eq!(r.errors, vec!["boom".to_string()]);
    }

    #[test]
    fn bot_author_matches_by_id_or_username() {
        let tracker = CommentTracker::new("review-bot".to_string(), Some(42));
        assert!(tracker.is_bot_author(42, "someone-else"));
        assert!(tracker.is_bot_author(1, "review-bot"));
        assert!(!tracker.is_bot_author(1, "someone-else"));
    }
}

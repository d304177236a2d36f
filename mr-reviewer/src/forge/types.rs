//! Wire-facing data model for the Forge (GitLab-shaped REST API).
//!
//! These types cross the HTTP boundary (either as `serde::Deserialize` targets
//! for Forge responses, or as `Serialize` request bodies); the parser/linemap
//! modules consume the `RawFileDiff` list produced here and build their own
//! internal model on top of it.

use serde::{Deserialize, Serialize};

/// Unique coordinate for a merge request: `(project_id, mr_iid)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MergeRequestRef {
    pub project_id: String,
    pub mr_iid: u64,
}

impl MergeRequestRef {
    pub fn new(project_id: impl Into<String>, mr_iid: u64) -> Self {
        MergeRequestRef {
            project_id: project_id.into(),
            mr_iid,
        }
    }

    /// Stable key used by CommitTracker/TaskSupervisor maps: `"{project}:{mr}"`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.project_id, self.mr_iid)
    }
}

/// The three commit SHAs needed to anchor an inline comment. Fetched once per
/// review and immutable for its lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffRefs {
    pub base_sha: String,
    pub start_sha: Option<String>,
    pub head_sha: String,
}

/// MR metadata needed to decide whether to review and to anchor comments.
#[derive(Debug, Clone)]
pub struct MrMetadata {
    pub mr_ref: MergeRequestRef,
    pub title: String,
    pub description: Option<String>,
    pub state: String,
    pub web_url: String,
    pub source_branch: String,
    pub target_branch: String,
    pub draft: bool,
    pub labels: Vec<String>,
    pub diff_refs: DiffRefs,
}

/// One file's raw unified-diff fragment, exactly as the Forge returns it.
/// This is the input to `DiffParser` and `LineMapper`.
#[derive(Debug, Clone)]
pub struct RawFileDiff {
    pub old_path: String,
    pub new_path: String,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_renamed: bool,
    /// `None` for binary/too-large files the Forge declined to diff.
    pub diff: Option<String>,
}

/// Position object attached to an inline discussion-creation request.
#[derive(Debug, Clone, Serialize)]
pub struct DiscussionPosition<'a> {
    pub base_sha: &'a str,
    pub start_sha: &'a str,
    pub head_sha: &'a str,
    pub position_type: &'static str,
    pub old_path: &'a str,
    pub new_path: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_line: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_line: Option<u32>,
    pub line_code: &'a str,
}

/// A note or the first note of a discussion, as returned by the Forge.
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeNote {
    pub id: u64,
    pub body: String,
    #[serde(default)]
    pub system: bool,
    pub author: ForgeUser,
    #[serde(default)]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForgeUser {
    pub id: u64,
    pub username: String,
}

/// A discussion thread, as returned by the Forge's list-discussions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeDiscussion {
    pub id: String,
    #[serde(default)]
    pub individual_note: bool,
    pub notes: Vec<ForgeNote>,
}

/// The subset of a merge-request webhook payload relevant to dispatching.
#[derive(Debug, Clone, Deserialize)]
pub struct MrWebhookPayload {
    pub object_attributes: MrWebhookObjectAttributes,
    pub project: MrWebhookProject,
    #[serde(default)]
    pub labels: Vec<MrWebhookLabel>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MrWebhookObjectAttributes {
    pub iid: u64,
    pub title: String,
    pub action: Option<String>,
    pub source_branch: String,
    pub target_branch: String,
    #[serde(default)]
    pub draft: bool,
    #[serde(default, alias = "work_in_progress")]
    pub work_in_progress: bool,
    pub last_commit: MrWebhookCommit,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MrWebhookCommit {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MrWebhookProject {
    pub id: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MrWebhookLabel {
    pub title: String,
}

/// The subset of a note webhook payload relevant to the "done" resolve flow.
#[derive(Debug, Clone, Deserialize)]
pub struct NoteWebhookPayload {
    pub object_attributes: NoteWebhookObjectAttributes,
    pub project: MrWebhookProject,
    #[serde(default)]
    pub merge_request: Option<NoteWebhookMergeRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteWebhookObjectAttributes {
    pub id: u64,
    pub note: String,
    pub noteable_type: String,
    #[serde(default)]
    pub discussion_id: Option<String>,
    #[serde(default)]
    pub resolvable: bool,
    #[serde(default)]
    pub resolved: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteWebhookMergeRequest {
    pub iid: u64,
}

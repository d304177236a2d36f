//! Forge facade (C1): the merge-request host abstraction behind an enum,
//! not a `Box<dyn Trait>` or `async-trait` object.
//!
//! `ProviderClient` is kept as an enum-dispatch shape for future providers;
//! GitLab is the only implemented arm. Every method here is a thin,
//! provider-dispatching wrapper around `gitlab::ForgeClient`.

pub mod gitlab;
pub mod types;

pub use types::*;

use crate::config::RetryConfig;
use crate::errors::MrResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    GitLab,
}

/// Runtime configuration for a provider client.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// API base, e.g. "https://gitlab.com/api/v4".
    pub base_api: String,
    pub token: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone)]
pub enum ProviderClient {
    GitLab(gitlab::ForgeClient),
}

impl ProviderClient {
    pub fn from_config(cfg: ProviderConfig) -> MrResult<Self> {
        let client = reqwest::Client::builder()
            .user_agent("mr-reviewer/0.1")
            .build()
            .map_err(crate::errors::ForgeError::from)?;
        Ok(match cfg.kind {
            ProviderKind::GitLab => Self::GitLab(gitlab::ForgeClient::new(
                client,
                cfg.base_api,
                cfg.token,
                cfg.retry,
            )),
        })
    }

    pub async fn fetch_mr_metadata(&self, project_id: &str, mr_iid: u64) -> MrResult<MrMetadata> {
        match self {
            Self::GitLab(c) => c.fetch_mr_metadata(project_id, mr_iid).await,
        }
    }

    pub async fn fetch_raw_diffs(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> MrResult<Vec<RawFileDiff>> {
        match self {
            Self::GitLab(c) => c.fetch_raw_diffs(project_id, mr_iid).await,
        }
    }

    pub async fn post_note(&self, project_id: &str, mr_iid: u64, body: &str) -> MrResult<u64> {
        match self {
            Self::GitLab(c) => c.post_note(project_id, mr_iid, body).await,
        }
    }

    pub async fn post_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        body: &str,
        position: &DiscussionPosition<'_>,
    ) -> MrResult<String> {
        match self {
            Self::GitLab(c) => c.post_discussion(project_id, mr_iid, body, position).await,
        }
    }

    pub async fn list_notes(&self, project_id: &str, mr_iid: u64) -> MrResult<Vec<ForgeNote>> {
        match self {
            Self::GitLab(c) => c.list_notes(project_id, mr_iid).await,
        }
    }

    pub async fn list_discussions(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> MrResult<Vec<ForgeDiscussion>> {
        match self {
            Self::GitLab(c) => c.list_discussions(project_id, mr_iid).await,
        }
    }

    pub async fn get_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
    ) -> MrResult<ForgeDiscussion> {
        match self {
            Self::GitLab(c) => c.get_discussion(project_id, mr_iid, discussion_id).await,
        }
    }

    pub async fn resolve_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
    ) -> MrResult<()> {
        match self {
            Self::GitLab(c) => c.resolve_discussion(project_id, mr_iid, discussion_id).await,
        }
    }

    pub async fn delete_note(&self, project_id: &str, mr_iid: u64, note_id: u64) -> MrResult<()> {
        match self {
            Self::GitLab(c) => c.delete_note(project_id, mr_iid, note_id).await,
        }
    }

    pub async fn delete_discussion_note(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
        note_id: u64,
    ) -> MrResult<()> {
        match self {
            Self::GitLab(c) => {
                c.delete_discussion_note(project_id, mr_iid, discussion_id, note_id)
                    .await
            }
        }
    }
}

//! GitLab REST v4 client: the concrete arm behind `ForgeClient` (C1).
//!
//! Endpoints used:
//! - GET    /projects/:id/merge_requests/:iid
//! - GET    /projects/:id/merge_requests/:iid/diffs
//! - GET    /projects/:id/merge_requests/:iid/notes
//! - GET    /projects/:id/merge_requests/:iid/discussions
//! - GET    /projects/:id/merge_requests/:iid/discussions/:discussion_id
//! - POST   /projects/:id/merge_requests/:iid/notes
//! - POST   /projects/:id/merge_requests/:iid/discussions
//! - PUT    /projects/:id/merge_requests/:iid/discussions/:discussion_id?resolved=true
//! - DELETE /projects/:id/merge_requests/:iid/notes/:note_id
//! - DELETE /projects/:id/merge_requests/:iid/discussions/:discussion_id/notes/:note_id
//!
//! Auth: `Authorization: Bearer <token>`.

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;

use crate::config::RetryConfig;
use crate::errors::{ForgeError, MrResult};
use crate::retry::retry_loop;

use super::types::*;

/// Response-body markers that identify a 400 as a rejected inline position,
/// normalized once here into `ForgeError::PositionRejected` so the publisher
/// branches on the typed variant, never on the raw message text.
const POSITION_REJECTED_MARKERS: &[&str] = &[
    "line_code",
    "can't be blank",
    "must be a valid line code",
];

#[derive(Debug, Clone)]
pub struct ForgeClient {
    http: Client,
    base_api: String,
    token: String,
    retry: RetryConfig,
}

impl ForgeClient {
    pub fn new(http: Client, base_api: String, token: String, retry: RetryConfig) -> Self {
        ForgeClient {
            base_api: base_api.trim_end_matches('/').to_string(),
            http,
            token,
            retry,
        }
    }

    fn mr_url(&self, project_id: &str, mr_iid: u64, suffix: &str) -> String {
        format!(
            "{}/projects/{}/merge_requests/{}{}",
            self.base_api,
            urlencoding::encode(project_id),
            mr_iid,
            suffix
        )
    }

    fn auth_header(token: &str) -> String {
        format!("Bearer {token}")
    }

    async fn send_with_retry<F, Fut>(&self, mut make_request: F) -> MrResult<Response>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<Response, reqwest::Error>>,
    {
        let retry = self.retry.clone();
        let outcome = retry_loop(
            &retry,
            |_attempt| make_request(),
            |res: &Result<Response, reqwest::Error>| match res {
                Ok(resp) => {
                    let code = resp.status().as_u16();
                    code == 429 || (500..=599).contains(&code)
                }
                Err(e) => e.is_timeout() || e.is_connect() || e.status().is_none(),
            },
        )
        .await;

        if outcome.exhausted {
            let last = match &outcome.result {
                Ok(resp) => format!("http status {}", resp.status().as_u16()),
                Err(e) => e.to_string(),
            };
            return Err(ForgeError::RetryExhausted {
                attempts: outcome.attempts,
                last,
            }
            .into());
        }

        outcome.result.map_err(|e| ForgeError::from(e).into())
    }

    pub async fn fetch_mr_metadata(&self, project_id: &str, mr_iid: u64) -> MrResult<MrMetadata> {
        let url = self.mr_url(project_id, mr_iid, "");
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        let raw: GitLabMr = resp
            .json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()))?;

        Ok(MrMetadata {
            mr_ref: MergeRequestRef::new(project_id, mr_iid),
            title: raw.title,
            description: raw.description,
            state: raw.state,
            web_url: raw.web_url,
            source_branch: raw.source_branch,
            target_branch: raw.target_branch,
            draft: raw.draft || raw.work_in_progress,
            labels: raw.labels,
            diff_refs: DiffRefs {
                base_sha: raw.diff_refs.base_sha,
                start_sha: Some(raw.diff_refs.start_sha),
                head_sha: raw.diff_refs.head_sha,
            },
        })
    }

    pub async fn fetch_raw_diffs(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> MrResult<Vec<RawFileDiff>> {
        let url = self.mr_url(project_id, mr_iid, "/diffs?per_page=100");
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        let raw: Vec<GitLabDiffFile> = resp
            .json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()))?;

        Ok(raw
            .into_iter()
            .map(|f| RawFileDiff {
                old_path: f.old_path,
                new_path: f.new_path,
                is_new: f.new_file,
                is_deleted: f.deleted_file,
                is_renamed: f.renamed_file,
                diff: f.diff,
            })
            .collect())
    }

    pub async fn post_note(&self, project_id: &str, mr_iid: u64, body: &str) -> MrResult<u64> {
        let url = self.mr_url(project_id, mr_iid, "/notes");
        let token = self.token.clone();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
        }
        let resp = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .json(&Req { body })
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        #[derive(Deserialize)]
        struct NoteResp {
            id: u64,
        }
        let nr: NoteResp = resp
            .json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()))?;
        Ok(nr.id)
    }

    /// Creates an inline discussion. Recognizes a rejected position and
    /// returns `ForgeError::PositionRejected` rather than a bare HTTP error,
    /// so the publisher can branch on the type.
    pub async fn post_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        body: &str,
        position: &DiscussionPosition<'_>,
    ) -> MrResult<String> {
        let url = self.mr_url(project_id, mr_iid, "/discussions");
        let token = self.token.clone();
        #[derive(serde::Serialize)]
        struct Req<'a> {
            body: &'a str,
            position: &'a DiscussionPosition<'a>,
        }
        let resp = self
            .send_with_retry(|| {
                self.http
                    .post(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .json(&Req { body, position })
                    .send()
            })
            .await?;

        if resp.status() == StatusCode::BAD_REQUEST {
            let text = resp.text().await.unwrap_or_default();
            let lower = text.to_ascii_lowercase();
            if POSITION_REJECTED_MARKERS.iter().any(|m| lower.contains(m))
                || (lower.contains("bad request") && lower.contains("note"))
            {
                return Err(ForgeError::PositionRejected { reason: text }.into());
            }
            return Err(ForgeError::HttpStatus(400).into());
        }
        let resp = check_status(resp).await?;

        #[derive(Deserialize)]
        struct DiscussionResp {
            id: String,
        }
        let dr: DiscussionResp = resp
            .json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()))?;
        Ok(dr.id)
    }

    pub async fn list_notes(&self, project_id: &str, mr_iid: u64) -> MrResult<Vec<ForgeNote>> {
        let url = self.mr_url(project_id, mr_iid, "/notes?per_page=100");
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()).into())
    }

    pub async fn list_discussions(
        &self,
        project_id: &str,
        mr_iid: u64,
    ) -> MrResult<Vec<ForgeDiscussion>> {
        let url = self.mr_url(project_id, mr_iid, "/discussions?per_page=100");
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()).into())
    }

    pub async fn get_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
    ) -> MrResult<ForgeDiscussion> {
        let url = self.mr_url(project_id, mr_iid, &format!("/discussions/{discussion_id}"));
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .get(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        let resp = check_status(resp).await?;
        resp.json()
            .await
            .map_err(|e| ForgeError::InvalidResponse(e.to_string()).into())
    }

    pub async fn resolve_discussion(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
    ) -> MrResult<()> {
        let url = self.mr_url(
            project_id,
            mr_iid,
            &format!("/discussions/{discussion_id}?resolved=true"),
        );
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .put(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn delete_note(&self, project_id: &str, mr_iid: u64, note_id: u64) -> MrResult<()> {
        let url = self.mr_url(project_id, mr_iid, &format!("/notes/{note_id}"));
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .delete(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        check_status(resp).await?;
        Ok(())
    }

    pub async fn delete_discussion_note(
        &self,
        project_id: &str,
        mr_iid: u64,
        discussion_id: &str,
        note_id: u64,
    ) -> MrResult<()> {
        let url = self.mr_url(
            project_id,
            mr_iid,
            &format!("/discussions/{discussion_id}/notes/{note_id}"),
        );
        let token = self.token.clone();
        let resp = self
            .send_with_retry(|| {
                self.http
                    .delete(&url)
                    .header("Authorization", Self::auth_header(&token))
                    .send()
            })
            .await?;
        check_status(resp).await?;
        Ok(())
    }
}

async fn check_status(resp: Response) -> MrResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let code = status.as_u16();
    let err = match code {
        401 => ForgeError::Unauthorized,
        403 => ForgeError::Forbidden,
        404 => ForgeError::NotFound,
        429 => ForgeError::RateLimited {
            retry_after_secs: None,
        },
        500..=599 => ForgeError::Server(code),
        _ => ForgeError::HttpStatus(code),
    };
    Err(err.into())
}

#[derive(Debug, Deserialize)]
struct GitLabMr {
    title: String,
    description: Option<String>,
    web_url: String,
    state: String,
    source_branch: String,
    target_branch: String,
    #[serde(default)]
    draft: bool,
    #[serde(default)]
    work_in_progress: bool,
    #[serde(default)]
    labels: Vec<String>,
    diff_refs: GitLabDiffRefs,
}

#[derive(Debug, Deserialize)]
struct GitLabDiffRefs {
    base_sha: String,
    head_sha: String,
    start_sha: String,
}

#[derive(Debug, Deserialize)]
struct GitLabDiffFile {
    old_path: String,
    new_path: String,
    new_file: bool,
    renamed_file: bool,
    deleted_file: bool,
    #[serde(default)]
    diff: Option<String>,
}

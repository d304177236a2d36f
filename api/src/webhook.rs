//! WebhookDispatcher (C10): the only place in this crate that understands
//! the Forge's webhook wire format. Validates the shared secret, classifies
//! the event kind, applies the full merge-request filter chain, and routes
//! admitted events into `TaskSupervisor` (merge_request) or directly into
//! the Forge client (note "done" resolve).

use mr_reviewer::forge::types::{MrWebhookPayload, NoteWebhookPayload};
use mr_reviewer::{Application, Error, MergeRequestRef};

/// GitLab's fixed `X-Gitlab-Event` header strings. Anything else is `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MergeRequest,
    Push,
    Note,
    Unknown,
}

pub fn classify_event(header: Option<&str>) -> EventKind {
    match header {
        Some("Merge Request Hook") => EventKind::MergeRequest,
        Some("Push Hook") => EventKind::Push,
        Some("Note Hook") => EventKind::Note,
        _ => EventKind::Unknown,
    }
}

/// Constant-time byte comparison for the webhook token. No `subtle`-style
/// crate appears anywhere in the example pack, so this is hand-rolled:
/// XOR every byte regardless of an early mismatch, fold with OR.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Outcome of dispatching one webhook request; the route handler maps this
/// to an HTTP status and body, never reimplementing the decision itself.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// Webhooks are globally disabled.
    Disabled,
    /// Token missing or mismatched.
    Unauthorized,
    /// Body did not parse as JSON (or as the expected event shape).
    Malformed(String),
    /// Recognized but filtered out; 200 with a reason.
    Ignored(String),
    /// Admitted and handed to the supervisor; 202 with a task id.
    Accepted(String),
    /// Supervisor is saturated; 429.
    Saturated,
    /// A "done" note resolved the discussion.
    NoteResolved,
    /// A "done" note failed to resolve (Forge error, or precondition not met).
    NoteResolveFailed(String),
    /// Any other failure while talking to the Forge or the supervisor; 500.
    InternalError(String),
}

/// Validates `X-Gitlab-Token` against the configured secret. Absent a
/// configured secret, every token is rejected — an unconfigured webhook
/// accepts nothing, it does not silently disable auth.
fn token_valid(configured: &str, presented: Option<&str>) -> bool {
    match presented {
        Some(token) => constant_time_eq(configured.as_bytes(), token.as_bytes()),
        None => false,
    }
}

/// Runs the full processing order from step 1 (disabled check) through
/// routing. `token` is the raw `X-Gitlab-Token` header value, `event_header`
/// the raw `X-Gitlab-Event` value, `body` the raw request bytes.
pub async fn dispatch(
    app: &Application,
    token: Option<&str>,
    event_header: Option<&str>,
    body: &[u8],
) -> DispatchOutcome {
    let webhook_cfg = &app.config.webhook;

    if !webhook_cfg.enabled {
        return DispatchOutcome::Disabled;
    }

    match &webhook_cfg.secret {
        Some(secret) => {
            if !token_valid(secret, token) {
                return DispatchOutcome::Unauthorized;
            }
        }
        None => return DispatchOutcome::Unauthorized,
    }

    match classify_event(event_header) {
        EventKind::MergeRequest => dispatch_merge_request(app, body).await,
        EventKind::Note => dispatch_note(app, body).await,
        EventKind::Push | EventKind::Unknown => DispatchOutcome::Ignored("ignored".to_string()),
    }
}

async fn dispatch_merge_request(app: &Application, body: &[u8]) -> DispatchOutcome {
    let payload: MrWebhookPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return DispatchOutcome::Malformed(e.to_string()),
    };

    let cfg = &app.config.webhook;
    let attrs = &payload.object_attributes;
    let labels: Vec<&str> = payload.labels.iter().map(|l| l.title.as_str()).collect();

    // 1. Action allow-list.
    let action = attrs.action.as_deref().unwrap_or("");
    if !cfg.allowed_mr_actions.iter().any(|a| a == action) {
        return DispatchOutcome::Ignored(format!("action '{action}' is not a trigger action"));
    }

    // 2. Draft/WIP skip (legacy work_in_progress alias already folded into
    // `draft` by serde on the wire type).
    let is_draft_or_wip = attrs.draft || attrs.work_in_progress;
    if cfg.skip_draft && is_draft_or_wip {
        return DispatchOutcome::Ignored("merge request is a draft/WIP".to_string());
    }

    // 3. Required labels.
    if !cfg
        .required_labels
        .iter()
        .all(|req| labels.iter().any(|l| l == req))
    {
        return DispatchOutcome::Ignored("required label(s) missing".to_string());
    }

    // 4. Excluded labels.
    if cfg
        .excluded_labels
        .iter()
        .any(|excl| labels.iter().any(|l| l == excl))
    {
        return DispatchOutcome::Ignored("excluded label present".to_string());
    }

    // 5. Allowed branch patterns (non-empty allow-list means "must match one").
    let patterns = &cfg.branch_patterns;
    if !patterns.allowed_source.is_empty()
        && !patterns
            .allowed_source
            .iter()
            .any(|re| re.is_match(&attrs.source_branch))
    {
        return DispatchOutcome::Ignored("source branch not in allow-list".to_string());
    }
    if !patterns.allowed_target.is_empty()
        && !patterns
            .allowed_target
            .iter()
            .any(|re| re.is_match(&attrs.target_branch))
    {
        return DispatchOutcome::Ignored("target branch not in allow-list".to_string());
    }

    // 6. Excluded branch patterns.
    if patterns
        .excluded_source
        .iter()
        .any(|re| re.is_match(&attrs.source_branch))
    {
        return DispatchOutcome::Ignored("source branch excluded".to_string());
    }
    if patterns
        .excluded_target
        .iter()
        .any(|re| re.is_match(&attrs.target_branch))
    {
        return DispatchOutcome::Ignored("target branch excluded".to_string());
    }

    // 7. Title-based WIP convention, predating the dedicated draft flag.
    if cfg.skip_wip {
        let title_lower = attrs.title.to_ascii_lowercase();
        if title_lower.starts_with("wip:") || title_lower.contains("[wip]") {
            return DispatchOutcome::Ignored("title marks merge request as WIP".to_string());
        }
    }

    let mr_ref = MergeRequestRef::new(payload.project.id.to_string(), attrs.iid);
    let head_sha = attrs.last_commit.id.clone();

    if app.config.deduplication_enabled
        && app
            .commit_tracker
            .is_reviewed(&mr_ref.project_id, mr_ref.mr_iid, &head_sha)
    {
        return DispatchOutcome::Ignored("commit already reviewed".to_string());
    }

    let options = app.default_review_options();
    match app
        .supervisor
        .submit(mr_ref, Some(head_sha), options, false)
    {
        Ok(task_id) => DispatchOutcome::Accepted(task_id),
        Err(Error::Concurrency(mr_reviewer::errors::ConcurrencyLimitError::TooManyReviews {
            ..
        })) => DispatchOutcome::Saturated,
        Err(Error::Concurrency(mr_reviewer::errors::ConcurrencyLimitError::AlreadyReviewed {
            ..
        })) => DispatchOutcome::Ignored("commit already reviewed".to_string()),
        Err(Error::Concurrency(mr_reviewer::errors::ConcurrencyLimitError::AlreadyActive {
            ..
        })) => DispatchOutcome::Ignored("a review is already active for this merge request".to_string()),
        Err(e) => DispatchOutcome::InternalError(e.to_string()),
    }
}

async fn dispatch_note(app: &Application, body: &[u8]) -> DispatchOutcome {
    let payload: NoteWebhookPayload = match serde_json::from_slice(body) {
        Ok(p) => p,
        Err(e) => return DispatchOutcome::Malformed(e.to_string()),
    };

    let attrs = &payload.object_attributes;

    let Some(mr) = &payload.merge_request else {
        return DispatchOutcome::Ignored("note is not attached to a merge request".to_string());
    };
    if attrs.noteable_type != "MergeRequest" {
        return DispatchOutcome::Ignored("note is not on a merge request".to_string());
    }
    let Some(discussion_id) = &attrs.discussion_id else {
        return DispatchOutcome::Ignored("note has no discussion id".to_string());
    };
    if !attrs.resolvable || attrs.resolved {
        return DispatchOutcome::Ignored("note is not an open resolvable discussion".to_string());
    }
    if attrs.note.trim().to_ascii_lowercase() != "done" {
        return DispatchOutcome::Ignored("note body is not 'done'".to_string());
    }

    let project_id = payload.project.id.to_string();
    let discussion = match app
        .forge
        .get_discussion(&project_id, mr.iid, discussion_id)
        .await
    {
        Ok(d) => d,
        Err(e) => return DispatchOutcome::NoteResolveFailed(e.to_string()),
    };

    let self_authored = discussion
        .notes
        .first()
        .map(|n| n.author.username == app.config.bot_username)
        .unwrap_or(false);
    if !self_authored {
        return DispatchOutcome::Ignored("discussion was not opened by the bot".to_string());
    }

    match app
        .forge
        .resolve_discussion(&project_id, mr.iid, discussion_id)
        .await
    {
        Ok(()) => DispatchOutcome::NoteResolved,
        Err(e) => DispatchOutcome::NoteResolveFailed(e.to_string()),
    }
}

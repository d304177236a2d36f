//! TaskSupervisor (C9): admission control, task lifecycle, and graceful
//! shutdown around `ReviewOrchestrator::run`. Owns no network clients itself
//! — it only schedules and bookkeeps.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::Config;
use crate::dedup::CommitTracker;
use crate::errors::{ConcurrencyLimitError, MrResult};
use crate::forge::types::MergeRequestRef;
use crate::orchestrator::{ReviewOptions, ReviewOrchestrator};
use crate::task::{ReviewTask, TaskFilter, TaskState};

pub struct TaskSupervisor {
    orchestrator: Arc<ReviewOrchestrator>,
    commit_tracker: Arc<CommitTracker>,
    max_concurrent_reviews: usize,
    review_timeout: Duration,
    shutdown_grace_period: Duration,
    history_size: usize,
    active: Mutex<HashMap<String, ReviewTask>>,
    handles: Mutex<HashMap<String, JoinHandle<()>>>,
    history: Mutex<VecDeque<ReviewTask>>,
    running_count: AtomicUsize,
    accepting: AtomicBool,
}

impl TaskSupervisor {
    pub fn new(
        orchestrator: Arc<ReviewOrchestrator>,
        commit_tracker: Arc<CommitTracker>,
        config: &Config,
    ) -> Arc<Self> {
        Arc::new(TaskSupervisor {
            orchestrator,
            commit_tracker,
            max_concurrent_reviews: config.scheduling.max_concurrent_reviews,
            review_timeout: config.scheduling.review_timeout,
            shutdown_grace_period: config.scheduling.shutdown_grace_period,
            history_size: config.scheduling.task_history_size,
            active: Mutex::new(HashMap::new()),
            handles: Mutex::new(HashMap::new()),
            history: Mutex::new(VecDeque::new()),
            running_count: AtomicUsize::new(0),
            accepting: AtomicBool::new(true),
        })
    }

    /// Admits a review request, or rejects it with a typed error. On
    /// success the task is created in `pending` state and a worker is
    /// spawned to run it; the returned id is stable for the task's lifetime.
    pub fn submit(
        self: &Arc<Self>,
        mr_ref: MergeRequestRef,
        head_sha: Option<String>,
        options: ReviewOptions,
        force: bool,
    ) -> MrResult<String> {
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(ConcurrencyLimitError::ShuttingDown.into());
        }

        {
            let active = self.active.lock().expect("active table mutex poisoned");
            let already_active = active.values().any(|t| {
                !t.state.is_terminal()
                    && t.mr_ref.project_id == mr_ref.project_id
                    && t.mr_ref.mr_iid == mr_ref.mr_iid
            });
            if already_active {
                return Err(ConcurrencyLimitError::AlreadyActive {
                    project: mr_ref.project_id.clone(),
                    mr_iid: mr_ref.mr_iid,
                }
                .into());
            }
        }

        if !force {
            if let Some(sha) = &head_sha {
                if self
                    .commit_tracker
                    .is_reviewed(&mr_ref.project_id, mr_ref.mr_iid, sha)
                {
                    return Err(ConcurrencyLimitError::AlreadyReviewed {
                        project: mr_ref.project_id.clone(),
                        mr_iid: mr_ref.mr_iid,
                        commit_sha: sha.clone(),
                    }
                    .into());
                }
            }
        }

        self.reserve_running_slot()?;

        let task_id = Uuid::new_v4().simple().to_string();
        let task = ReviewTask::new(task_id.clone(), mr_ref.clone());
        self.active
            .lock()
            .expect("active table mutex poisoned")
            .insert(task_id.clone(), task);

        let supervisor = self.clone();
        let id_for_worker = task_id.clone();
        let handle = tokio::spawn(async move {
            supervisor.run_worker(id_for_worker, mr_ref, options).await;
        });
        self.handles
            .lock()
            .expect("handle table mutex poisoned")
            .insert(task_id.clone(), handle);

        Ok(task_id)
    }

    /// Atomically claims one of `max_concurrent_reviews` slots, or rejects
    /// with `TooManyReviews`. Must run before the worker is spawned so two
    /// near-simultaneous `submit` calls for distinct MRs cannot both observe
    /// room and both get admitted; the slot is released exactly once, in
    /// `run_worker`, after the orchestrator run completes.
    fn reserve_running_slot(&self) -> MrResult<()> {
        loop {
            let running = self.running_count.load(Ordering::SeqCst);
            if running >= self.max_concurrent_reviews {
                return Err(ConcurrencyLimitError::TooManyReviews {
                    running,
                    max: self.max_concurrent_reviews,
                }
                .into());
            }
            if self
                .running_count
                .compare_exchange(running, running + 1, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return Ok(());
            }
        }
    }

    async fn run_worker(self: Arc<Self>, task_id: String, mr_ref: MergeRequestRef, options: ReviewOptions) {
        self.transition(&task_id, |t| {
            t.state = TaskState::Running;
            t.started_at = Some(Utc::now());
            t.message = "running".to_string();
        });

        let outcome = tokio::time::timeout(
            self.review_timeout,
            self.orchestrator.run(mr_ref, options),
        )
        .await;

        self.running_count.fetch_sub(1, Ordering::SeqCst);

        match outcome {
            Ok(Ok(result)) => {
                self.finish(&task_id, TaskState::Completed, |t| {
                    t.message = result.message.clone();
                    t.progress = 1.0;
                    t.result = Some(result);
                });
            }
            Ok(Err(err)) => {
                tracing::warn!(task_id = %task_id, error = %err, "review task failed");
                self.finish(&task_id, TaskState::Failed, |t| {
                    t.error = Some(err.to_string());
                });
            }
            Err(_elapsed) => {
                let message = format!(
                    "review exceeded timeout of {} seconds",
                    self.review_timeout.as_secs()
                );
                tracing::warn!(task_id = %task_id, "{message}");
                self.finish(&task_id, TaskState::Failed, move |t| {
                    t.error = Some(message.clone());
                });
            }
        }

        self.handles
            .lock()
            .expect("handle table mutex poisoned")
            .remove(&task_id);
    }

    fn transition(&self, task_id: &str, f: impl FnOnce(&mut ReviewTask)) {
        let mut active = self.active.lock().expect("active table mutex poisoned");
        if let Some(task) = active.get_mut(task_id) {
            f(task);
        }
    }

    /// Applies the terminal transition and moves the task from the active
    /// table into the bounded history ring, evicting the oldest entry once
    /// `history_size` is exceeded.
    fn finish(&self, task_id: &str, state: TaskState, f: impl FnOnce(&mut ReviewTask)) {
        let mut active = self.active.lock().expect("active table mutex poisoned");
        let Some(mut task) = active.remove(task_id) else {
            return;
        };
        drop(active);

        task.state = state;
        task.completed_at = Some(Utc::now());
        f(&mut task);

        let mut history = self.history.lock().expect("history ring mutex poisoned");
        history.push_back(task);
        while history.len() > self.history_size {
            history.pop_front();
        }
    }

    pub fn get_task(&self, task_id: &str) -> MrResult<ReviewTask> {
        if let Some(task) = self
            .active
            .lock()
            .expect("active table mutex poisoned")
            .get(task_id)
        {
            return Ok(task.clone());
        }
        if let Some(task) = self
            .history
            .lock()
            .expect("history ring mutex poisoned")
            .iter()
            .find(|t| t.task_id == task_id)
        {
            return Ok(task.clone());
        }
        Err(ConcurrencyLimitError::UnknownTask(task_id.to_string()).into())
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<ReviewTask> {
        let active = self.active.lock().expect("active table mutex poisoned");
        let history = self.history.lock().expect("history ring mutex poisoned");

        let mut all: Vec<ReviewTask> = active.values().cloned().chain(history.iter().cloned()).collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        all.retain(|t| {
            filter.state.is_none_or(|s| t.state == s)
                && filter
                    .project_id
                    .as_ref()
                    .is_none_or(|p| &t.mr_ref.project_id == p)
        });

        if let Some(limit) = filter.limit {
            all.truncate(limit);
        }
        all
    }

    /// Stops admitting new tasks, aborts every in-flight worker (the
    /// cooperative cancellation point tokio gives us: a task is unwound at
    /// its next `.await`), waits up to `shutdown_grace_period` for the
    /// aborted tasks to unwind, then moves every remaining active task to
    /// history as cancelled.
    pub async fn shutdown(self: &Arc<Self>) {
        self.accepting.store(false, Ordering::SeqCst);

        let handles: Vec<(String, JoinHandle<()>)> = {
            let mut handles = self.handles.lock().expect("handle table mutex poisoned");
            handles.drain().collect()
        };

        for (_, handle) in &handles {
            handle.abort();
        }

        let grace = self.shutdown_grace_period;
        for (task_id, handle) in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                tracing::warn!(task_id = %task_id, "worker did not unwind within shutdown grace period");
            }
        }

        let remaining: Vec<String> = self
            .active
            .lock()
            .expect("active table mutex poisoned")
            .keys()
            .cloned()
            .collect();
        for task_id in remaining {
            self.finish(&task_id, TaskState::Cancelled, |t| {
                t.message = "cancelled due to server shutdown".to_string();
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::dedup::CommentTracker;
    use crate::forge::{ProviderConfig, ProviderKind};
    use crate::llm::LlmClient;
    use std::time::Duration as StdDuration;

    fn test_config() -> Config {
        Config {
            gitlab_api_url: "https://example.test/api/v4".into(),
            gitlab_token: "t".into(),
            glm_api_url: "https://llm.example.test".into(),
            glm_api_key: "k".into(),
            glm_model: "m".into(),
            glm_temperature: 0.2,
            glm_max_tokens: 1000,
            scheduling: crate::config::SchedulingConfig {
                max_concurrent_reviews: 1,
                ..Default::default()
            },
            chunker: crate::config::ChunkerConfig::default(),
            retry: RetryConfig::default(),
            webhook: crate::config::WebhookConfig::default(),
            deduplication_enabled: false,
            dedup_strategy: crate::config::DeduplicationStrategy::DeleteSummaryOnly,
            commit_ttl: StdDuration::from_secs(3600),
            bot_username: "bot".into(),
            bot_user_id: None,
        }
    }

    fn test_supervisor() -> Arc<TaskSupervisor> {
        let config = test_config();
        let forge = Arc::new(
            crate::forge::ProviderClient::from_config(ProviderConfig {
                kind: ProviderKind::GitLab,
                base_api: "http://127.0.0.1:1".into(),
                token: "t".into(),
                retry: RetryConfig::default(),
            })
            .unwrap(),
        );
        let llm = Arc::new(LlmClient::new(
            reqwest::Client::new(),
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
            forge,
            llm,
            commit_tracker.clone(),
            comment_tracker,
            &config,
        ));
        TaskSupervisor::new(orchestrator, commit_tracker, &config)
    }

    #[tokio::test]
    async fn rejects_duplicate_active_submission_for_same_mr() {
        let supervisor = test_supervisor();
        let mr_ref = MergeRequestRef::new("p1", 1);
        let options = ReviewOptions::from_config(&test_config());

        let first = supervisor.submit(mr_ref.clone(), None, options.clone(), false);
        assert!(first.is_ok());

        let second = supervisor.submit(mr_ref, None, options, false);
        assert!(matches!(
            second,
            Err(crate::errors::Error::Concurrency(
                ConcurrencyLimitError::AlreadyActive { .. }
            ))
        ));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn rejects_already_reviewed_commit_absent_force() {
        let supervisor = test_supervisor();
        supervisor.commit_tracker.mark_reviewed("p1", 1, "sha1", 2);

        let options = ReviewOptions::from_config(&test_config());
        let result = supervisor.submit(
            MergeRequestRef::new("p1", 1),
            Some("sha1".to_string()),
            options,
            false,
        );
        assert!(matches!(
            result,
            Err(crate::errors::Error::Concurrency(
                ConcurrencyLimitError::AlreadyReviewed { .. }
            ))
        ));
    }

    #[tokio::test]
    async fn get_task_reports_unknown_id() {
        let supervisor = test_supervisor();
        let err = supervisor.get_task("not-a-real-id").unwrap_err();
        assert!(matches!(
            err,
            crate::errors::Error::Concurrency(ConcurrencyLimitError::UnknownTask(_))
        ));
    }

    #[tokio::test]
    async fn concurrency_cap_is_reserved_at_admission_not_at_worker_poll() {
        let supervisor = test_supervisor();
        let options = ReviewOptions::from_config(&test_config());

        // max_concurrent_reviews=1. Two distinct MRs submitted back to back,
        // before the runtime has had a chance to poll either worker: the
        // second must still be rejected, because the slot is reserved
        // synchronously inside `submit`, not inside the spawned worker.
        let first = supervisor.submit(MergeRequestRef::new("p1", 1), None, options.clone(), false);
        assert!(first.is_ok());

        let second = supervisor.submit(MergeRequestRef::new("p2", 2), None, options, false);
        assert!(matches!(
            second,
            Err(crate::errors::Error::Concurrency(
                ConcurrencyLimitError::TooManyReviews { .. }
            ))
        ));

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn submit_rejects_when_shutting_down() {
        let supervisor = test_supervisor();
        supervisor.shutdown().await;
        let options = ReviewOptions::from_config(&test_config());
        let result = supervisor.submit(MergeRequestRef::new("p1", 2), None, options, false);
        assert!(matches!(
            result,
            Err(crate::errors::Error::Concurrency(
                ConcurrencyLimitError::ShuttingDown
            ))
        ));
    }
}

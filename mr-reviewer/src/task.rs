//! Task bookkeeping types shared by `TaskSupervisor`: `ReviewTask` (the
//! record itself) and `TaskFilter` (the read-query shape for `list_tasks`).

use chrono::{DateTime, Utc};

use crate::forge::types::MergeRequestRef;
use crate::orchestrator::ReviewResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

/// One submitted review, from admission through its terminal state.
/// Transitions are monotonic: `pending -> running -> {completed, failed,
/// cancelled}`; callers never observe a terminal task revert.
#[derive(Debug, Clone)]
pub struct ReviewTask {
    pub task_id: String,
    pub mr_ref: MergeRequestRef,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub progress: f64,
    pub message: String,
    pub result: Option<ReviewResult>,
    pub error: Option<String>,
}

impl ReviewTask {
    pub fn new(task_id: String, mr_ref: MergeRequestRef) -> Self {
        ReviewTask {
            task_id,
            mr_ref,
            state: TaskState::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            progress: 0.0,
            message: "queued".to_string(),
            result: None,
            error: None,
        }
    }
}

/// Query shape for `TaskSupervisor::list_tasks`.
#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub state: Option<TaskState>,
    pub project_id: Option<String>,
    pub limit: Option<usize>,
}

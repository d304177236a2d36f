//! CommitTracker: an in-memory, TTL-keyed map from `"{project}:{mr}:{sha}"`
//! to `ReviewedCommit`, gating entry to the orchestrator. Lazy eviction: every
//! read sweeps entries whose `expires_at <= now` first. Process-local only —
//! losing state on restart is acceptable (duplicate review cost is bounded,
//! webhook redelivery is rare).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// One dedup cache entry: a commit already reviewed for a given MR.
#[derive(Debug, Clone)]
pub struct ReviewedCommit {
    pub project_id: String,
    pub mr_iid: u64,
    pub commit_sha: String,
    pub reviewed_at: DateTime<Utc>,
    pub comment_count: usize,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot counters for the `/status` read model.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommitTrackerStats {
    pub entries: usize,
}

fn key(project_id: &str, mr_iid: u64, commit_sha: &str) -> String {
    format!("{project_id}:{mr_iid}:{commit_sha}")
}

pub struct CommitTracker {
    ttl: Duration,
    entries: Mutex<HashMap<String, ReviewedCommit>>,
}

impl CommitTracker {
    pub fn new(ttl: Duration) -> Self {
        CommitTracker {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Sweeps expired entries. Called at the top of every read.
    fn sweep(&self, map: &mut HashMap<String, ReviewedCommit>) {
        let now = Utc::now();
        map.retain(|_, v| v.expires_at > now);
    }

    pub fn is_reviewed(&self, project_id: &str, mr_iid: u64, commit_sha: &str) -> bool {
        let mut map = self.entries.lock().expect("commit tracker mutex poisoned");
        self.sweep(&mut map);
        map.contains_key(&key(project_id, mr_iid, commit_sha))
    }

    pub fn mark_reviewed(
        &self,
        project_id: &str,
        mr_iid: u64,
        commit_sha: &str,
        comment_count: usize,
    ) {
        let mut map = self.entries.lock().expect("commit tracker mutex poisoned");
        self.sweep(&mut map);
        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(self.ttl).unwrap_or_else(|_| chrono::Duration::hours(24));
        map.insert(
            key(project_id, mr_iid, commit_sha),
            ReviewedCommit {
                project_id: project_id.to_string(),
                mr_iid,
                commit_sha: commit_sha.to_string(),
                reviewed_at: now,
                comment_count,
                expires_at,
            },
        );
    }

    /// Evicts every entry for a given MR, regardless of commit sha. Used when
    /// the MR closes so a reopen doesn't inherit a stale dedup decision.
    pub fn clear_mr(&self, project_id: &str, mr_iid: u64) {
        let mut map = self.entries.lock().expect("commit tracker mutex poisoned");
        let prefix = format!("{project_id}:{mr_iid}:");
        map.retain(|k, _| !k.starts_with(&prefix));
    }

    pub fn stats(&self) -> CommitTrackerStats {
        let mut map = self.entries.lock().expect("commit tracker mutex poisoned");
        self.sweep(&mut map);
        CommitTrackerStats {
            entries: map.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marks_and_reports_reviewed() {
        let tracker = CommitTracker::new(Duration::from_secs(3600));
        assert!(!tracker.is_reviewed("p1", 1, "abc"));
        tracker.mark_reviewed("p1", 1, "abc", 3);
        assert!(tracker.is_reviewed("p1", 1, "abc"));
        assert!(!tracker.is_reviewed("p1", 1, "def"));
    }

    #[test]
    fn lazy_eviction_sweeps_expired_entries() {
        let tracker = CommitTracker::new(Duration::from_millis(0));
        tracker.mark_reviewed("p1", 1, "abc", 1);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tracker.is_reviewed("p1", 1, "abc"));
        assert_eq!(tracker.stats().entries, 0);
    }

    #[test]
    fn clear_mr_evicts_all_commits_for_that_mr_only() {
        let tracker = CommitTracker::new(Duration::from_secs(3600));
        tracker.mark_reviewed("p1", 1, "abc", 1);
        tracker.mark_reviewed("p1", 2, "xyz", 1);
        tracker.clear_mr("p1", 1);
        assert!(!tracker.is_reviewed("p1", 1, "abc"));
        assert!(tracker.is_reviewed("p1", 2, "xyz"));
    }
}

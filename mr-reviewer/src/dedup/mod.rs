//! Deduplication (C7): CommitTracker gates entry to the orchestrator;
//! CommentTracker cleans up a bot's prior notes before a new review publishes.

pub mod comment_tracker;
pub mod commit_tracker;

pub use comment_tracker::{CommentTracker, DeduplicationResult, TrackedComment};
pub use commit_tracker::{CommitTracker, CommitTrackerStats, ReviewedCommit};

use std::sync::Arc;
use std::time::Instant;

use mr_reviewer::Application;

/// Shared state for every handler: the whole `mr-reviewer` pipeline plus the
/// process start time used to compute `/health` and `/status` uptime.
#[derive(Clone)]
pub struct AppState {
    pub app: Arc<Application>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(app: Application) -> Self {
        AppState {
            app: Arc::new(app),
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

//! Named job managers (C13/C14) that wire long-running maintenance and
//! analytics work onto the scheduler through the background task queue,
//! tracking per-job status the way `original_source/jobs/*.py` does.

pub mod analytics_jobs;
pub mod maintenance_jobs;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;

/// Lifecycle state of one named job's most recent run, queryable by the
/// HTTP layer.
#[derive(Debug, Clone, serde::Serialize, Default)]
pub struct JobStatus {
    pub state: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub message: Option<String>,
}

#[derive(Clone, Default)]
pub struct JobStatusMap {
    inner: Arc<Mutex<HashMap<String, JobStatus>>>,
}

impl JobStatusMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn mark_running(&self, name: &str) {
        let mut guard = self.inner.lock().await;
        guard.insert(
            name.to_string(),
            JobStatus { state: "running".to_string(), started_at: Some(Utc::now().to_rfc3339()), finished_at: None, message: None },
        );
    }

    pub async fn mark_completed(&self, name: &str) {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(name.to_string()).or_default();
        entry.state = "completed".to_string();
        entry.finished_at = Some(Utc::now().to_rfc3339());
        entry.message = None;
    }

    pub async fn mark_error(&self, name: &str, message: String) {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(name.to_string()).or_default();
        entry.state = "error".to_string();
        entry.finished_at = Some(Utc::now().to_rfc3339());
        entry.message = Some(message);
    }

    pub async fn snapshot(&self) -> HashMap<String, JobStatus> {
        self.inner.lock().await.clone()
    }
}

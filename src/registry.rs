use std::{collections::HashMap, path::PathBuf, sync::Arc};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::models::{JobRecord, JobState};

/// Process-wide store of conversion job state, shared between the HTTP
/// handlers and the conversion workers. Every write replaces the record
/// under the lock, so pollers always see a whole record, never a torn one.
///
/// Records are kept for the lifetime of the process; there is no cleanup.
#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<RwLock<HashMap<String, JobRecord>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a job. Overwrites any previous record under the same id.
    pub async fn insert(&self, record: JobRecord) {
        let mut jobs = self.inner.write().await;
        jobs.insert(record.job_id.clone(), record);
    }

    /// Remove a job record, e.g. when enqueueing it failed after
    /// registration. Returns the removed record if it existed.
    pub async fn remove(&self, job_id: &str) -> Option<JobRecord> {
        let mut jobs = self.inner.write().await;
        jobs.remove(job_id)
    }

    /// Snapshot of the current state for `job_id`.
    pub async fn get(&self, job_id: &str) -> Option<JobRecord> {
        let jobs = self.inner.read().await;
        jobs.get(job_id).cloned()
    }

    /// Advance a job's state. Enforces the lifecycle invariants:
    /// terminal records never change, the state rank never decreases,
    /// percent stays within [0, 100] and never moves backwards within a
    /// state (a state change carries its own checkpoint value, e.g. the
    /// fixed 90 on entering `Processing`). A transition into `Error`
    /// resets percent to 0. Returns false if the update was rejected or
    /// the id unknown.
    pub async fn transition(
        &self,
        job_id: &str,
        status: JobState,
        percent: f64,
        message: impl Into<String>,
    ) -> bool {
        let mut jobs = self.inner.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            debug!(job_id, "Dropping update for unknown job");
            return false;
        };

        if job.status.is_terminal() || status.rank() < job.status.rank() {
            debug!(
                job_id,
                from = ?job.status,
                to = ?status,
                "Rejecting backward or post-terminal transition"
            );
            return false;
        }

        let percent = if status == JobState::Error {
            0.0
        } else if status == job.status {
            percent.clamp(0.0, 100.0).max(job.percent)
        } else {
            percent.clamp(0.0, 100.0)
        };

        job.status = status;
        job.percent = percent;
        job.message = message.into();
        job.updated_at = Utc::now();
        true
    }

    /// Terminal success write: marks the job completed and attaches the
    /// resolved artifact.
    pub async fn complete(&self, job_id: &str, path: PathBuf, file_name: String) -> bool {
        let mut jobs = self.inner.write().await;
        let Some(job) = jobs.get_mut(job_id) else {
            return false;
        };
        if job.status.is_terminal() {
            return false;
        }

        job.status = JobState::Completed;
        job.percent = 100.0;
        job.message = "Conversion terminée!".to_string();
        job.file_path = Some(path);
        job.file_name = Some(file_name);
        job.updated_at = Utc::now();
        true
    }
}

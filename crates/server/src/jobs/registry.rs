// crates/server/src/jobs/registry.rs
//! Process-wide job registry.
//!
//! Maps job id → shared [`JobState`]. The map lock is held only long enough
//! to clone the entry's `Arc`; all progress mutation goes through the
//! entry's own atomics, so independent jobs never contend with each other.
//!
//! The registry is constructed explicitly and injected through `AppState` —
//! there is no module-level singleton.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use super::state::JobState;
use super::types::{generate_job_id, JobId, JobSnapshot};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("a job with id '{0}' already exists")]
    DuplicateId(JobId),

    #[error("job '{0}' not found")]
    NotFound(JobId),

    #[error("job '{0}' is still running")]
    StillRunning(JobId),
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<JobId, Arc<JobState>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a new job entry. A caller-supplied id collides with any job
    /// still in the registry; `None` generates a fresh id.
    pub fn create(
        &self,
        id: Option<JobId>,
        total: u64,
        out_dir: PathBuf,
    ) -> Result<Arc<JobState>, RegistryError> {
        let id = id.unwrap_or_else(generate_job_id);
        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if jobs.contains_key(&id) {
            return Err(RegistryError::DuplicateId(id));
        }
        let state = Arc::new(JobState::new(id.clone(), total, out_dir));
        jobs.insert(id, Arc::clone(&state));
        Ok(state)
    }

    /// Shared handle to a live job, or `None` for unknown/evicted ids.
    pub fn get(&self, id: &str) -> Option<Arc<JobState>> {
        match self.jobs.read() {
            Ok(jobs) => jobs.get(id).cloned(),
            Err(e) => {
                tracing::error!("job map lock poisoned on read: {e}");
                None
            }
        }
    }

    /// Poll-transport read: a point-in-time snapshot.
    pub fn snapshot(&self, id: &str) -> Option<JobSnapshot> {
        self.get(id).map(|job| job.snapshot())
    }

    /// Snapshots of every job currently in the registry.
    pub fn jobs(&self) -> Vec<JobSnapshot> {
        match self.jobs.read() {
            Ok(jobs) => jobs.values().map(|j| j.snapshot()).collect(),
            Err(e) => {
                tracing::error!("job map lock poisoned on read: {e}");
                Vec::new()
            }
        }
    }

    /// Raise a job's cancellation flag. Idempotent; requests for unknown,
    /// already-cancelled or already-terminal jobs are accepted no-ops.
    /// Returns `true` if this call actually flipped the flag.
    pub fn request_cancel(&self, id: &str) -> bool {
        match self.get(id) {
            Some(job) => {
                let flipped = job.request_cancel();
                if flipped {
                    tracing::info!(job_id = %id, "cancellation requested");
                } else {
                    tracing::debug!(job_id = %id, "repeated cancellation request ignored");
                }
                flipped
            }
            None => {
                tracing::debug!(job_id = %id, "cancellation for unknown job ignored");
                false
            }
        }
    }

    /// Client acknowledgment of a terminal job: evict it.
    pub fn acknowledge(&self, id: &str) -> Result<(), RegistryError> {
        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match jobs.get(id) {
            None => Err(RegistryError::NotFound(id.to_string())),
            Some(job) if !job.status().is_terminal() => {
                Err(RegistryError::StillRunning(id.to_string()))
            }
            Some(_) => {
                jobs.remove(id);
                Ok(())
            }
        }
    }

    /// Timeout eviction: drop the entry if it reached a terminal state.
    /// Returns `true` if the entry was removed.
    pub fn evict_if_terminal(&self, id: &str) -> bool {
        let mut jobs = self
            .jobs
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match jobs.get(id) {
            Some(job) if job.status().is_terminal() => {
                jobs.remove(id);
                true
            }
            _ => false,
        }
    }

    pub fn len(&self) -> usize {
        self.jobs.read().map(|j| j.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

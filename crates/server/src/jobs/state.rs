// crates/server/src/jobs/state.rs
//! Atomic per-job progress state.
//!
//! One [`JobState`] is the single authoritative record for a batch run.
//! Counters are written only by the job runner; the registry and both
//! delivery transports read them without taking any lock. Counter writes use
//! release ordering and reads acquire ordering, so a reader that observes an
//! updated count also observes the completed item's effects.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use tokio::sync::{broadcast, Notify};

use super::types::{ItemError, JobEvent, JobId, JobSnapshot, JobStatus};

/// Cap on stored per-item error detail. The aggregate `errors` counter keeps
/// counting past the cap; only the samples are bounded.
pub const MAX_ERROR_SAMPLES: usize = 32;

#[derive(Debug)]
pub struct JobState {
    id: JobId,
    /// Item count, fixed at creation from the discovery snapshot.
    total: u64,
    out_dir: PathBuf,
    created_at: String,
    status: AtomicU8,
    done: AtomicU64,
    errors: AtomicU64,
    cancel_requested: AtomicBool,
    /// Wakes the runner when it is parked waiting for a worker slot.
    cancel_notify: Notify,
    error_samples: Mutex<Vec<ItemError>>,
    message: RwLock<Option<String>>,
    events_tx: broadcast::Sender<JobEvent>,
}

impl JobState {
    pub fn new(id: JobId, total: u64, out_dir: PathBuf) -> Self {
        let (events_tx, _) = broadcast::channel(256);
        Self {
            id,
            total,
            out_dir,
            created_at: chrono::Utc::now().to_rfc3339(),
            status: AtomicU8::new(JobStatus::Pending as u8),
            done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            cancel_requested: AtomicBool::new(false),
            cancel_notify: Notify::new(),
            error_samples: Mutex::new(Vec::new()),
            message: RwLock::new(None),
            events_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    pub fn status(&self) -> JobStatus {
        // An out-of-range value cannot be stored through this API.
        JobStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(JobStatus::Failed)
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Acquire)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Acquire)
    }

    /// Items accounted for, success or failure.
    pub fn processed(&self) -> u64 {
        self.done() + self.errors()
    }

    // -- Transitions ----------------------------------------------------------

    /// Pending → Running. Returns `false` if the job already left Pending.
    pub fn set_running(&self) -> bool {
        let moved = self.transition(JobStatus::Pending, JobStatus::Running);
        if moved {
            let _ = self.events_tx.send(JobEvent::Started { total: self.total });
        }
        moved
    }

    /// Running → Done.
    pub fn finalize_done(&self) -> bool {
        self.finalize(JobStatus::Done, None)
    }

    /// Running → Cancelled.
    pub fn finalize_cancelled(&self) -> bool {
        self.finalize(JobStatus::Cancelled, None)
    }

    /// Running → Failed, with the structural failure message.
    pub fn finalize_failed(&self, message: impl Into<String>) -> bool {
        self.finalize(JobStatus::Failed, Some(message.into()))
    }

    fn finalize(&self, terminal: JobStatus, message: Option<String>) -> bool {
        debug_assert!(terminal.is_terminal());
        if let Some(msg) = message {
            match self.message.write() {
                Ok(mut guard) => *guard = Some(msg),
                Err(e) => tracing::error!("message lock poisoned: {e}"),
            }
        }
        let moved = self.transition(JobStatus::Running, terminal);
        if moved {
            let _ = self.events_tx.send(JobEvent::Finished {
                processed: self.processed(),
                errors: self.errors(),
                cancelled: terminal == JobStatus::Cancelled,
                out_dir: self.out_dir.clone(),
            });
        }
        moved
    }

    /// CAS-guarded transition; terminal states are never left.
    fn transition(&self, from: JobStatus, to: JobStatus) -> bool {
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    // -- Counters (runner only) -----------------------------------------------

    /// Record one successfully processed item. Returns the new done count.
    pub fn record_success(&self) -> u64 {
        let done = self.done.fetch_add(1, Ordering::Release) + 1;
        let _ = self.events_tx.send(JobEvent::Progress {
            done,
            total: self.total,
        });
        done
    }

    /// Record one failed item: bump the aggregate counter and keep a capped
    /// sample of the detail.
    pub fn record_failure(&self, rel: &Path, message: impl Into<String>) {
        self.errors.fetch_add(1, Ordering::Release);
        match self.error_samples.lock() {
            Ok(mut samples) => {
                if samples.len() < MAX_ERROR_SAMPLES {
                    samples.push(ItemError {
                        file: rel.display().to_string(),
                        message: message.into(),
                    });
                }
            }
            Err(e) => tracing::error!("error sample lock poisoned: {e}"),
        }
        let _ = self.events_tx.send(JobEvent::Progress {
            done: self.done(),
            total: self.total,
        });
    }

    // -- Cancellation flag ----------------------------------------------------

    /// Raise the cancellation flag. Monotone false→true; returns `true` only
    /// for the transition, `false` for repeated requests.
    pub fn request_cancel(&self) -> bool {
        let flipped = !self.cancel_requested.swap(true, Ordering::AcqRel);
        if flipped {
            self.cancel_notify.notify_waiters();
        }
        flipped
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::Acquire)
    }

    /// Resolve once the cancellation flag is raised; immediately if it
    /// already is. Registering the waiter before checking the flag closes
    /// the missed-wakeup window.
    pub async fn cancelled(&self) {
        let notified = self.cancel_notify.notified();
        if self.cancel_requested() {
            return;
        }
        notified.await;
    }

    // -- Readers --------------------------------------------------------------

    /// Subscribe to the ordered progress event sequence.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events_tx.subscribe()
    }

    /// Point-in-time snapshot for the poll transport.
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.id.clone(),
            state: self.status(),
            done: self.done(),
            total: self.total,
            errors: self.errors(),
            out_dir: self.out_dir.clone(),
            error_samples: match self.error_samples.lock() {
                Ok(samples) => samples.clone(),
                Err(e) => {
                    tracing::error!("error sample lock poisoned: {e}");
                    Vec::new()
                }
            },
            cancel_requested: self.cancel_requested(),
            created_at: self.created_at.clone(),
            message: match self.message.read() {
                Ok(guard) => guard.clone(),
                Err(e) => {
                    tracing::error!("message lock poisoned: {e}");
                    None
                }
            },
        }
    }
}

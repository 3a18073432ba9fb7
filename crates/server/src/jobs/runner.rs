// crates/server/src/jobs/runner.rs
//! Job runner: drives one batch end-to-end.
//!
//! One coordinating task per job feeds a bounded [`WorkerPool`] from the
//! stable item snapshot, folds completions into the job's counters, observes
//! the cancellation flag between dispatches, and finalizes the terminal
//! state. The watermark operation itself is injected, so the orchestration
//! is testable without touching pixels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use stamper_core::{OutputFormat, OutputMap, Template, WorkItem};

use super::registry::JobRegistry;
use super::state::JobState;
use super::types::JobStatus;

/// The per-file operation a worker invokes. Defaults to the real watermark
/// composition; tests inject stubs.
pub type ApplyFn =
    dyn Fn(&Path, &Path, &Template, OutputFormat, u8) -> Result<(), String> + Send + Sync;

/// Everything a job needs beyond its [`JobState`]: the item snapshot taken
/// at start and the processing parameters.
pub struct JobPlan {
    pub items: Vec<WorkItem>,
    pub template: Template,
    pub output: OutputMap,
    pub quality: u8,
    pub overwrite: bool,
    pub open_when_done: bool,
    pub apply: Arc<ApplyFn>,
}

impl JobPlan {
    pub fn new(
        items: Vec<WorkItem>,
        template: Template,
        output: OutputMap,
        quality: u8,
        overwrite: bool,
        open_when_done: bool,
    ) -> Self {
        Self {
            items,
            template,
            output,
            quality,
            overwrite,
            open_when_done,
            apply: Arc::new(
                |src: &Path, dst: &Path, template: &Template, format: OutputFormat, quality: u8| {
                    stamper_core::watermark::apply(src, dst, template, format, quality)
                        .map_err(|e| e.to_string())
                },
            ),
        }
    }
}

/// Scheduling knobs for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunnerConfig {
    pub concurrency: usize,
    pub cancel_grace: Duration,
    pub evict_after: Duration,
}

struct ItemOutcome {
    rel: PathBuf,
    result: Result<(), String>,
}

/// Fixed-size concurrent executor. Each dispatched unit runs the apply
/// operation on a blocking thread; the semaphore bounds how many are in
/// flight at once.
struct WorkerPool {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<ItemOutcome>,
}

impl WorkerPool {
    fn new(limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
        }
    }

    /// Wait for a free worker slot.
    async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("worker semaphore is never closed")
    }

    fn dispatch(
        &mut self,
        permit: OwnedSemaphorePermit,
        item: WorkItem,
        dst: PathBuf,
        template: Template,
        format: OutputFormat,
        quality: u8,
        apply: Arc<ApplyFn>,
    ) {
        self.tasks.spawn(async move {
            let rel = item.rel.clone();
            let joined = tokio::task::spawn_blocking(move || {
                (apply)(&item.src, &dst, &template, format, quality)
            })
            .await;
            drop(permit);
            let result = match joined {
                Ok(result) => result,
                // A panicking worker is contained: it costs one item, not the batch.
                Err(join_err) => Err(format!("worker crashed: {join_err}")),
            };
            ItemOutcome { rel, result }
        });
    }

    fn try_join_next(&mut self) -> Option<ItemOutcome> {
        match self.tasks.try_join_next()? {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(ItemOutcome {
                rel: PathBuf::from("<worker>"),
                result: Err(format!("worker task failed: {e}")),
            }),
        }
    }

    async fn join_next(&mut self) -> Option<ItemOutcome> {
        match self.tasks.join_next().await? {
            Ok(outcome) => Some(outcome),
            Err(e) => Some(ItemOutcome {
                rel: PathBuf::from("<worker>"),
                result: Err(format!("worker task failed: {e}")),
            }),
        }
    }

    fn abort_all(&mut self) {
        self.tasks.abort_all();
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

/// Launch the coordinating task for one job.
pub fn spawn(registry: Arc<JobRegistry>, job: Arc<JobState>, plan: JobPlan, cfg: RunnerConfig) {
    tokio::spawn(run(registry, job, plan, cfg));
}

async fn run(registry: Arc<JobRegistry>, job: Arc<JobState>, plan: JobPlan, cfg: RunnerConfig) {
    let started = std::time::Instant::now();
    job.set_running();
    tracing::info!(job_id = %job.id(), total = job.total(), "job started");

    let mut pool = WorkerPool::new(cfg.concurrency.max(1));
    let mut fatal: Option<String> = None;

    for item in plan.items {
        if job.cancel_requested() {
            break;
        }
        let dst = plan.output.path_for(&item.rel);
        if let Some(parent) = dst.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                fatal = Some(format!(
                    "cannot create output directory {}: {e}",
                    parent.display()
                ));
                break;
            }
        }
        if !plan.overwrite && dst.exists() {
            // Existing output counts as done without re-rendering.
            job.record_success();
            continue;
        }
        // Waiting for a worker slot must not blind us to a cancellation:
        // the flag wakes this select via the job's notifier.
        let permit = tokio::select! {
            permit = pool.acquire() => permit,
            _ = job.cancelled() => break,
        };
        // Re-check right before dispatch: both branches may have been ready.
        if job.cancel_requested() {
            break;
        }
        pool.dispatch(
            permit,
            item,
            dst,
            plan.template.clone(),
            plan.output.format(),
            plan.quality,
            Arc::clone(&plan.apply),
        );
        while let Some(outcome) = pool.try_join_next() {
            record(&job, outcome);
        }
    }

    // Natural drain is unbounded; once a cancellation (or fatal error) is in
    // the picture, in-flight units only get the grace window so an
    // unresponsive worker cannot stall finalization.
    let interrupted = if fatal.is_some() || job.cancel_requested() {
        true
    } else {
        tokio::select! {
            _ = drain_all(&mut pool, &job) => false,
            _ = job.cancelled() => true,
        }
    };
    if interrupted
        && tokio::time::timeout(cfg.cancel_grace, drain_all(&mut pool, &job))
            .await
            .is_err()
    {
        tracing::warn!(
            job_id = %job.id(),
            in_flight = pool.len(),
            grace_secs = cfg.cancel_grace.as_secs_f64(),
            "grace window expired, abandoning in-flight work"
        );
        pool.abort_all();
    }

    if let Some(message) = fatal {
        tracing::error!(job_id = %job.id(), message = %message, "job failed");
        job.finalize_failed(message);
    } else if job.processed() == job.total() {
        // Every item completed: natural exhaustion takes precedence over a
        // cancellation that arrived too late to prevent it.
        job.finalize_done();
    } else {
        job.finalize_cancelled();
    }

    tracing::info!(
        job_id = %job.id(),
        state = job.status().as_str(),
        done = job.done(),
        errors = job.errors(),
        duration_secs = started.elapsed().as_secs_f64(),
        "job finished"
    );

    if job.status() == JobStatus::Done && plan.open_when_done {
        if let Err(e) = open::that(job.out_dir()) {
            tracing::warn!(job_id = %job.id(), error = %e, "could not open output folder");
        }
    }

    // Timeout eviction, unless the client acknowledges (DELETE) first.
    let id = job.id().to_string();
    tokio::spawn(async move {
        tokio::time::sleep(cfg.evict_after).await;
        if registry.evict_if_terminal(&id) {
            tracing::debug!(job_id = %id, "job evicted after timeout");
        }
    });
}

async fn drain_all(pool: &mut WorkerPool, job: &JobState) {
    while let Some(outcome) = pool.join_next().await {
        record(job, outcome);
    }
}

fn record(job: &JobState, outcome: ItemOutcome) {
    match outcome.result {
        Ok(()) => {
            job.record_success();
        }
        Err(message) => {
            tracing::debug!(
                job_id = %job.id(),
                file = %outcome.rel.display(),
                error = %message,
                "item failed"
            );
            job.record_failure(&outcome.rel, message);
        }
    }
}

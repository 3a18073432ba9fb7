// crates/server/src/routes/jobs.rs
//! Batch job routes: start, poll, push-stream, cancel, acknowledge.
//!
//! - POST   /jobs               — start a job, respond `202 {jobId, total}`
//! - GET    /jobs               — snapshots of all known jobs
//! - GET    /jobs/{id}          — poll one job (stateless snapshot read)
//! - GET    /jobs/{id}/stream   — SSE attach to a running (or finished) job
//! - GET    /jobs/stream?…      — validate, start and stream in one request
//! - POST   /jobs/{id}/cancel   — idempotent cancellation request
//! - DELETE /jobs/{id}          — acknowledge a terminal job (evict)
//!
//! The push stream emits `start {total}` once, `progress {done, total}` as
//! the counters advance, and exactly one terminal
//! `done {processed, cancelled, outDir, errors}`. A client whose stream
//! breaks falls back to polling; closing the stream never cancels the job.

use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::extract::{Path as RoutePath, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;

use stamper_core::{enumerate_images, OutputFormat, OutputMap};

use crate::error::{ApiError, ApiResult};
use crate::jobs::{
    is_valid_job_id, runner, JobEvent, JobPlan, JobSnapshot, JobState, JobStatus, RegistryError,
    RunnerConfig,
};
use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

/// Parameters for starting a job, accepted both as a JSON body
/// (POST /jobs) and as query parameters (GET /jobs/stream).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobRequest {
    pub input_dir: PathBuf,
    pub template_name: String,
    #[serde(default)]
    pub output_format: Option<String>,
    #[serde(default = "default_quality")]
    pub quality: u8,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub overwrite: bool,
    #[serde(default)]
    pub open_when_done: bool,
    /// Client-supplied id, so a push-streaming client can cancel later.
    #[serde(default)]
    pub job_id: Option<String>,
}

fn default_quality() -> u8 {
    90
}

fn default_true() -> bool {
    true
}

/// Response for POST /api/jobs (202 Accepted).
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartJobResponse {
    pub job_id: String,
    pub total: u64,
}

/// Response for POST /api/jobs/{id}/cancel.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelResponse {
    pub job_id: String,
    pub accepted: bool,
}

// ============================================================================
// Validation + launch (shared by both start flavors)
// ============================================================================

fn default_output_root(input: &Path) -> PathBuf {
    let name = input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("batch");
    input
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(format!("{name}_watermarked"))
}

/// Validate a start request and launch the job. Every failure here is
/// surfaced synchronously — no job is created.
fn launch(state: &Arc<AppState>, req: StartJobRequest) -> ApiResult<Arc<JobState>> {
    if let Some(id) = &req.job_id {
        if !is_valid_job_id(id) {
            return Err(ApiError::BadRequest(
                "job_id must be 1-64 characters of [A-Za-z0-9_-]".to_string(),
            ));
        }
    }

    let template = state.templates.get(&req.template_name).ok_or_else(|| {
        ApiError::BadRequest(format!("template '{}' not found", req.template_name))
    })?;

    let format: OutputFormat = req
        .output_format
        .as_deref()
        .unwrap_or("KEEP")
        .parse()
        .map_err(|e: stamper_core::FormatError| ApiError::BadRequest(e.to_string()))?;

    // The one and only enumeration: this list is the job's stable snapshot.
    let items =
        enumerate_images(&req.input_dir).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    if items.is_empty() {
        return Err(ApiError::BadRequest(format!(
            "no images found in {}",
            req.input_dir.display()
        )));
    }

    let out_root = req
        .output_dir
        .clone()
        .unwrap_or_else(|| default_output_root(&req.input_dir));
    std::fs::create_dir_all(&out_root).map_err(|e| {
        ApiError::BadRequest(format!(
            "cannot create output directory {}: {e}",
            out_root.display()
        ))
    })?;

    let total = items.len() as u64;
    let job = state
        .jobs
        .create(req.job_id.clone(), total, out_root.clone())
        .map_err(|e| ApiError::Conflict(e.to_string()))?;

    let plan = JobPlan::new(
        items,
        template,
        OutputMap::new(out_root, format),
        req.quality.clamp(1, 100),
        req.overwrite,
        req.open_when_done,
    );
    let cfg = RunnerConfig {
        concurrency: state.config.worker_concurrency,
        cancel_grace: state.config.cancel_grace,
        evict_after: state.config.evict_after,
    };
    runner::spawn(Arc::clone(&state.jobs), Arc::clone(&job), plan, cfg);

    tracing::info!(
        job_id = %job.id(),
        total,
        input_dir = %req.input_dir.display(),
        template = %req.template_name,
        "job launched"
    );
    Ok(job)
}

// ============================================================================
// Route Handlers
// ============================================================================

/// POST /api/jobs — start a job for later polling.
async fn start_job(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartJobRequest>,
) -> ApiResult<(StatusCode, Json<StartJobResponse>)> {
    let job = launch(&state, req)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(StartJobResponse {
            job_id: job.id().to_string(),
            total: job.total(),
        }),
    ))
}

/// GET /api/jobs — snapshots of every job still in the registry.
async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<Vec<JobSnapshot>> {
    Json(state.jobs.jobs())
}

/// GET /api/jobs/{id} — the poll transport: a stateless snapshot read.
async fn get_job(
    State(state): State<Arc<AppState>>,
    RoutePath(id): RoutePath<String>,
) -> ApiResult<Json<JobSnapshot>> {
    state
        .jobs
        .snapshot(&id)
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// POST /api/jobs/{id}/cancel — raise the cancellation flag.
///
/// Accepted regardless of job state: repeated requests, requests for jobs
/// already terminal, and requests for ids the registry no longer knows are
/// all no-ops, not errors. Only a malformed id is rejected.
async fn cancel_job(
    State(state): State<Arc<AppState>>,
    RoutePath(id): RoutePath<String>,
) -> ApiResult<(StatusCode, Json<CancelResponse>)> {
    if !is_valid_job_id(&id) {
        return Err(ApiError::BadRequest(
            "job_id must be 1-64 characters of [A-Za-z0-9_-]".to_string(),
        ));
    }
    state.jobs.request_cancel(&id);
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelResponse {
            job_id: id,
            accepted: true,
        }),
    ))
}

/// DELETE /api/jobs/{id} — client acknowledgment of a terminal job.
async fn ack_job(
    State(state): State<Arc<AppState>>,
    RoutePath(id): RoutePath<String>,
) -> ApiResult<StatusCode> {
    match state.jobs.acknowledge(&id) {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(RegistryError::NotFound(id)) => Err(ApiError::JobNotFound(id)),
        Err(e @ RegistryError::StillRunning(_)) => Err(ApiError::Conflict(e.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

/// GET /api/jobs/{id}/stream — SSE attach to an existing job.
async fn stream_job(
    State(state): State<Arc<AppState>>,
    RoutePath(id): RoutePath<String>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = state.jobs.get(&id).ok_or(ApiError::JobNotFound(id))?;
    Ok(sse_for_job(job))
}

/// GET /api/jobs/stream?… — validate, start and stream in one request.
/// The client keys the job with its own `job_id` so it can cancel later.
async fn start_and_stream(
    State(state): State<Arc<AppState>>,
    Query(req): Query<StartJobRequest>,
) -> ApiResult<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>> {
    let job = launch(&state, req)?;
    Ok(sse_for_job(job))
}

// ============================================================================
// Push transport
// ============================================================================

fn progress_event(done: u64, total: u64) -> Event {
    Event::default()
        .event("progress")
        .data(serde_json::json!({ "done": done, "total": total }).to_string())
}

fn done_event(snap: &JobSnapshot) -> Event {
    Event::default().event("done").data(
        serde_json::json!({
            "processed": snap.done + snap.errors,
            "cancelled": snap.state == JobStatus::Cancelled,
            "outDir": snap.out_dir,
            "errors": snap.errors,
        })
        .to_string(),
    )
}

/// Push delivery for one job: `start` once, monotone `progress`, exactly one
/// terminal `done`, then the stream ends.
///
/// The stream only reads JobState. Individual progress ticks may be skipped
/// (broadcast lag resyncs from a snapshot); the terminal event never is.
fn sse_for_job(job: Arc<JobState>) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        // Subscribe before snapshotting so nothing falls between the two.
        let mut rx = job.subscribe();
        let snap = job.snapshot();

        yield Ok(Event::default()
            .event("start")
            .data(serde_json::json!({ "total": snap.total }).to_string()));

        if snap.state.is_terminal() {
            // Late subscriber: the outcome is already known.
            yield Ok(done_event(&snap));
        } else {
            let mut last_done = snap.done;
            if last_done > 0 {
                yield Ok(progress_event(last_done, snap.total));
            }

            loop {
                match rx.recv().await {
                    Ok(JobEvent::Progress { done, total }) => {
                        if done > last_done {
                            last_done = done;
                            yield Ok(progress_event(done, total));
                        }
                    }
                    Ok(JobEvent::Finished { .. }) => {
                        yield Ok(done_event(&job.snapshot()));
                        break;
                    }
                    Ok(JobEvent::Started { .. }) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        // Fell behind the broadcast: resynchronize from state.
                        tracing::debug!(job_id = %job.id(), skipped, "push subscriber lagged");
                        let snap = job.snapshot();
                        if snap.done > last_done {
                            last_done = snap.done;
                            yield Ok(progress_event(snap.done, snap.total));
                        }
                        if snap.state.is_terminal() {
                            yield Ok(done_event(&snap));
                            break;
                        }
                    }
                    Err(RecvError::Closed) => {
                        let snap = job.snapshot();
                        if snap.state.is_terminal() {
                            yield Ok(done_event(&snap));
                        }
                        break;
                    }
                }
            }
        }
    };
    Sse::new(stream)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", post(start_job).get(list_jobs))
        .route("/jobs/stream", get(start_and_stream))
        .route("/jobs/{id}", get(get_job).delete(ack_job))
        .route("/jobs/{id}/stream", get(stream_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
}

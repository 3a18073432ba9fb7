// crates/server/src/jobs/types.rs
//! Types shared across the job subsystem.

use std::path::PathBuf;

use serde::Serialize;

/// Opaque job identifier. Either supplied by the client (so it can cancel a
/// push-streamed job) or generated server-side.
pub type JobId = String;

/// Lifecycle of a batch job. Transitions are strictly monotonic:
/// Pending → Running → one of {Done, Cancelled, Failed}.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum JobStatus {
    Pending = 0,
    Running = 1,
    Done = 2,
    Cancelled = 3,
    Failed = 4,
}

impl JobStatus {
    /// Convert a raw `u8` into a status variant.
    /// Returns `None` for values outside the valid range.
    pub(crate) fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Pending),
            1 => Some(Self::Running),
            2 => Some(Self::Done),
            3 => Some(Self::Cancelled),
            4 => Some(Self::Failed),
            _ => None,
        }
    }

    /// Done, Cancelled and Failed are terminal; no transition leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Cancelled => "cancelled",
            Self::Failed => "failed",
        }
    }
}

/// One entry of the capped per-job error sample list.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemError {
    /// Path relative to the input root.
    pub file: String,
    pub message: String,
}

/// Typed progress message emitted by a job, in order. Both delivery
/// transports are fed from this one sequence (push directly, pull via the
/// snapshot the same state backs).
#[derive(Debug, Clone)]
pub enum JobEvent {
    Started { total: u64 },
    Progress { done: u64, total: u64 },
    Finished {
        processed: u64,
        errors: u64,
        cancelled: bool,
        out_dir: PathBuf,
    },
}

/// Point-in-time view of a job for the poll transport.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub state: JobStatus,
    pub done: u64,
    pub total: u64,
    pub errors: u64,
    pub out_dir: PathBuf,
    pub error_samples: Vec<ItemError>,
    pub cancel_requested: bool,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Generate a fresh job id (32 lowercase hex chars).
pub fn generate_job_id() -> JobId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Client-supplied ids must be short and filesystem/URL-safe.
pub fn is_valid_job_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

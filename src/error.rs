//! Error types for the doc2pdf library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`Doc2PdfError`]: **Fatal for the call**: the submission or lookup
//!   cannot proceed (workspace could not be created, unknown job, bad
//!   config). Returned as `Err(Doc2PdfError)` from [`crate::ConversionService`]
//!   methods.
//!
//! * [`JobFailure`]: **Per job**: the conversion was admitted but could not
//!   run (converter binary missing, profile directory not writable). Carried
//!   by the job's [`crate::registry::JobHandle`] rather than returned to the
//!   submitter, because admission already succeeded by the time it happens.
//!
//! Neither type records a terminal state on disk: a job whose conversion
//! failed stays `pending` for status queries.

use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the doc2pdf library.
#[derive(Debug, Error)]
pub enum Doc2PdfError {
    // ── Workspace errors ──────────────────────────────────────────────────
    /// The job directory already exists (job id collision).
    #[error("Workspace '{path}' already exists")]
    WorkspaceExists { path: PathBuf },

    /// Creating, writing or removing part of a job workspace failed.
    #[error("Workspace I/O failed on '{path}': {source}")]
    WorkspaceIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Every generated job id collided with an existing workspace.
    #[error("Could not allocate a free job id after {attempts} attempts")]
    IdSpaceExhausted { attempts: u32 },

    // ── Registry errors ───────────────────────────────────────────────────
    /// The job id is not known to this process (it may still exist on disk
    /// from an earlier run).
    #[error("Job '{job_id}' is not tracked by this process")]
    UnknownJob { job_id: String },

    /// The service was shut down and admits no more jobs.
    #[error("Conversion service is shut down")]
    ShutDown,

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Doc2PdfError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Doc2PdfError::WorkspaceIo {
            path: path.into(),
            source,
        }
    }
}

/// A per-job failure: the conversion was admitted but never produced a
/// converter exit status.
///
/// Cloneable so every waiter on a shared [`crate::registry::JobHandle`]
/// receives the same value.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum JobFailure {
    /// The isolated converter profile could not be prepared.
    #[error("Job {job_id}: converter profile setup failed: {detail}")]
    ProfileSetup { job_id: String, detail: String },

    /// The converter process could not be started.
    #[error("Job {job_id}: failed to spawn '{program}': {detail}")]
    SpawnFailed {
        job_id: String,
        program: String,
        detail: String,
    },

    /// Waiting on (or killing) the converter process failed.
    #[error("Job {job_id}: waiting on converter failed: {detail}")]
    WaitFailed { job_id: String, detail: String },

    /// The conversion task ended without reporting (panic or runtime shutdown).
    #[error("Job {job_id}: conversion task aborted: {detail}")]
    Aborted { job_id: String, detail: String },
}

impl JobFailure {
    /// The id of the job this failure belongs to.
    pub fn job_id(&self) -> &str {
        match self {
            JobFailure::ProfileSetup { job_id, .. }
            | JobFailure::SpawnFailed { job_id, .. }
            | JobFailure::WaitFailed { job_id, .. }
            | JobFailure::Aborted { job_id, .. } => job_id,
        }
    }
}

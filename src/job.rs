//! Job identity and the derived job state.
//!
//! Job ids are short random strings. Uniqueness is probabilistic: the id
//! generator never looks at existing jobs, collisions are detected later when
//! the workspace directory turns out to exist already.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;
use std::path::{Component, Path, PathBuf};

/// Characters a generated job id is drawn from.
pub const JOB_ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Length of a generated job id.
pub const JOB_ID_LEN: usize = 5;

/// Identifier of one conversion job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// Draw a fresh id: [`JOB_ID_LEN`] characters, each chosen uniformly from
    /// [`JOB_ID_ALPHABET`].
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id = (0..JOB_ID_LEN)
            .map(|_| JOB_ID_ALPHABET[rng.gen_range(0..JOB_ID_ALPHABET.len())] as char)
            .collect();
        JobId(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for JobId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for JobId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<String> for JobId {
    fn from(value: String) -> Self {
        JobId(value)
    }
}

impl From<&str> for JobId {
    fn from(value: &str) -> Self {
        JobId(value.to_string())
    }
}

/// Whether `candidate` names exactly one directory entry directly under the
/// working directory.
///
/// Ids coming from outside (a URL path, a CLI argument) are checked with this
/// before being joined onto the working directory, so `..`, `a/b` or an
/// absolute path can never address anything outside it.
pub fn is_plain_component(candidate: &str) -> bool {
    let mut components = Path::new(candidate).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(name)), None) if name == candidate
    )
}

/// Current state of a job, derived from the filesystem on every query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// No workspace exists for this id.
    Invalid,
    /// The workspace exists but the PDF does not (queued, converting, timed
    /// out, or crashed; indistinguishable from outside).
    Pending,
    /// The PDF has been produced.
    Ok,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Invalid => "invalid",
            JobState::Pending => "pending",
            JobState::Ok => "ok",
        }
    }

    /// Whether the state can still change without outside intervention.
    pub fn is_pending(self) -> bool {
        matches!(self, JobState::Pending)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status body handed to a transport layer (JSON API, CLI `--json`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: JobState,
    pub job_id: String,
    pub message: String,
    /// Location of the finished PDF; only present when `status` is `ok`.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub pdf: Option<PathBuf>,
}

impl StatusReport {
    pub fn new(job_id: impl Into<String>, status: JobState, pdf: Option<PathBuf>) -> Self {
        let job_id = job_id.into();
        let message = match status {
            JobState::Ok => "document ready".to_string(),
            JobState::Pending => "document pending".to_string(),
            JobState::Invalid => format!("{job_id} doesn't exist"),
        };
        let pdf = match status {
            JobState::Ok => pdf,
            _ => None,
        };
        Self {
            status,
            job_id,
            message,
            pdf,
        }
    }
}

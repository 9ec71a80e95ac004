//! Running one conversion end to end.
//!
//! ## Steps
//!
//! ```text
//! acquire slot ──▶ fresh profile ──▶ spawn converter ──▶ wait ≤ timeout ──▶ discard profile, release slot
//! ```
//!
//! 1. [`crate::limiter`]: suspend until a conversion slot is free
//! 2. [`profile`]: create a private converter profile seeded with the
//!    static payload
//! 3. [`process`]: spawn the converter headless, buffer its output, kill its
//!    process group when the run ends or the deadline passes
//! 4. the slot and the profile are released whatever happened
//!
//! Whether the conversion *worked* is never decided here. The converter's
//! exit code is logged, and the job's status comes from whether the PDF
//! exists (see [`crate::workspace::resolve_status`]).

pub mod process;
pub mod profile;

use crate::config::ServiceConfig;
use crate::error::JobFailure;
use crate::events::JobEvents;
use crate::limiter::ConcurrencyLimiter;
use crate::workspace::JobWorkspace;
use process::{ProcessError, ProcessRun};
use profile::ConverterProfile;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// How a conversion that managed to run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// The converter exited by itself. A zero exit code does not guarantee
    /// a PDF and a non-zero one does not rule it out.
    Exited {
        exit_code: Option<i32>,
        duration_ms: u64,
    },
    /// The converter was killed after running for `after_secs`.
    TimedOut { after_secs: u64 },
}

impl ConversionOutcome {
    pub fn is_timed_out(&self) -> bool {
        matches!(self, ConversionOutcome::TimedOut { .. })
    }
}

/// Executes conversions. Cheap to clone; clones share the limiter.
#[derive(Clone)]
pub struct ConversionWorker {
    limiter: ConcurrencyLimiter,
    converter: PathBuf,
    timeout: Duration,
    profile_payload: Arc<str>,
    profile_root: Option<PathBuf>,
    events: Option<JobEvents>,
}

impl ConversionWorker {
    pub fn new(config: &ServiceConfig, limiter: ConcurrencyLimiter) -> Self {
        Self {
            limiter,
            converter: config.converter.clone(),
            timeout: config.timeout(),
            profile_payload: Arc::clone(&config.profile_payload),
            profile_root: config.profile_root.clone(),
            events: config.events.clone(),
        }
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        &self.limiter
    }

    /// Convert `job`'s input into `job.output_dir`.
    ///
    /// Always returns after releasing the slot and removing the profile.
    /// An `Err` means the converter never produced an exit status.
    pub async fn run(&self, job: JobWorkspace) -> Result<ConversionOutcome, JobFailure> {
        let result = self.run_with_slot(&job).await;

        match &result {
            Ok(outcome) => {
                if let Some(ref cb) = self.events {
                    cb.on_conversion_finished(job.job_id.as_str(), outcome);
                }
            }
            Err(failure) => {
                error!("{}", failure);
                if let Some(ref cb) = self.events {
                    cb.on_conversion_failed(job.job_id.as_str(), failure);
                }
            }
        }

        result
    }

    async fn run_with_slot(&self, job: &JobWorkspace) -> Result<ConversionOutcome, JobFailure> {
        let job_id = job.job_id.as_str();

        // ── Step 1: Wait for a slot ──────────────────────────────────────
        let _slot = self.limiter.acquire().await.map_err(|e| JobFailure::Aborted {
            job_id: job_id.to_string(),
            detail: e.to_string(),
        })?;

        let start = Instant::now();
        info!("Job {}: started", job_id);
        if let Some(ref cb) = self.events {
            cb.on_conversion_start(job_id);
        }

        // ── Step 2: Private converter profile ────────────────────────────
        let profile = ConverterProfile::create(
            self.profile_root.as_deref(),
            &job.job_id,
            &self.profile_payload,
        )
        .await
        .map_err(|e| JobFailure::ProfileSetup {
            job_id: job_id.to_string(),
            detail: e.to_string(),
        })?;
        debug!("Job {}: profile {}", job_id, profile.path().display());

        // ── Step 3: Run the converter ────────────────────────────────────
        let args = process::converter_args(
            &profile.installation_url(),
            &job.output_dir,
            &job.input_path,
        );
        let run = process::run_converter(&self.converter, args, self.timeout).await;

        // ── Step 4: Discard the profile, whatever happened ───────────────
        if let Err(e) = profile.discard().await {
            warn!("Job {}: failed to remove converter profile: {}", job_id, e);
        }
        let elapsed = start.elapsed();
        debug!("Job {}: took {} seconds", job_id, elapsed.as_secs());

        match run {
            Ok(ProcessRun::Exited {
                status,
                stdout,
                stderr,
            }) => {
                info!("Job {}: exited with {}", job_id, status);
                if !stdout.is_empty() {
                    debug!("Job {} stdout:\n{}", job_id, String::from_utf8_lossy(&stdout));
                }
                if !stderr.is_empty() {
                    debug!("Job {} stderr:\n{}", job_id, String::from_utf8_lossy(&stderr));
                }
                Ok(ConversionOutcome::Exited {
                    exit_code: status.code(),
                    duration_ms: elapsed.as_millis() as u64,
                })
            }
            Ok(ProcessRun::TimedOut { pid }) => {
                error!(
                    "Job {}: timed out after {}s, killed converter process group (pid {:?})",
                    job_id,
                    self.timeout.as_secs(),
                    pid
                );
                Ok(ConversionOutcome::TimedOut {
                    after_secs: self.timeout.as_secs(),
                })
            }
            Err(ProcessError::Spawn(e)) => Err(JobFailure::SpawnFailed {
                job_id: job_id.to_string(),
                program: self.converter.display().to_string(),
                detail: e.to_string(),
            }),
            Err(ProcessError::Wait(e)) => Err(JobFailure::WaitFailed {
                job_id: job_id.to_string(),
                detail: e.to_string(),
            }),
        }
    }
}

//! The conversion service: admission, status and completion lookup.
//!
//! ## Admission vs. execution
//!
//! [`ConversionService::submit`] writes the job's workspace and input, spawns
//! the conversion task, registers its handle and returns the id. It never
//! waits for a conversion slot; the spawned task does that. A burst of
//! submissions is therefore admitted immediately and drains at the speed of
//! the limiter.
//!
//! ## Three ways to observe a job
//!
//! * [`ConversionService::status`]: filesystem only, works for jobs from any
//!   process that shares the working directory
//! * [`ConversionService::report`]: the same, as a serialisable body
//! * [`ConversionService::await_completion`]: in-memory handle, only for
//!   jobs admitted by this process

use crate::config::ServiceConfig;
use crate::error::Doc2PdfError;
use crate::job::{JobId, JobState, StatusReport};
use crate::limiter::ConcurrencyLimiter;
use crate::registry::{JobHandle, JobRegistry};
use crate::worker::ConversionWorker;
use crate::workspace::{JobWorkspace, Workspace};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Orchestrates conversions for one working directory.
///
/// Must be created and used inside a Tokio runtime.
pub struct ConversionService {
    config: ServiceConfig,
    workspace: Workspace,
    registry: Arc<JobRegistry>,
    worker: ConversionWorker,
}

impl ConversionService {
    /// Start a service with its own, empty registry.
    ///
    /// Creates the working directory if needed.
    pub async fn new(config: ServiceConfig) -> Result<Self, Doc2PdfError> {
        Self::with_registry(config, Arc::new(JobRegistry::new())).await
    }

    /// Start a service that records handles in `registry`.
    pub async fn with_registry(
        config: ServiceConfig,
        registry: Arc<JobRegistry>,
    ) -> Result<Self, Doc2PdfError> {
        let workspace = Workspace::new(&config.working_directory);
        workspace.ensure_root().await?;

        let limiter = ConcurrencyLimiter::new(config.concurrency);
        let worker = ConversionWorker::new(&config, limiter);

        info!(
            "Conversion service ready: {} (concurrency {}, timeout {}s, converter {})",
            workspace.root().display(),
            config.concurrency,
            config.timeout_secs,
            config.converter.display()
        );

        Ok(Self {
            config,
            workspace,
            registry,
            worker,
        })
    }

    /// Admit a document for conversion and return its job id.
    ///
    /// On return the input is on disk and the job is `pending`. The
    /// conversion itself runs in the background.
    ///
    /// # Errors
    /// Workspace creation or the input write failed, no free job id was
    /// found within `id_attempts` tries, or the service was shut down.
    pub async fn submit(&self, filename: &str, bytes: &[u8]) -> Result<JobId, Doc2PdfError> {
        if self.limiter().is_closed() {
            return Err(Doc2PdfError::ShutDown);
        }
        info!("Uploaded file {} {} bytes", filename, bytes.len());

        let job = self.allocate_workspace(filename).await?;
        if let Err(e) = self.workspace.write_input(&job.input_path, bytes).await {
            // Leave nothing half-admitted behind.
            if let Err(cleanup) = self.workspace.remove_job(job.job_id.as_str()).await {
                warn!("Job {}: failed to clean up workspace: {}", job.job_id, cleanup);
            }
            return Err(e);
        }

        let job_id = job.job_id.clone();
        if let Some(ref cb) = self.config.events {
            cb.on_job_admitted(job_id.as_str(), bytes.len());
        }

        let worker = self.worker.clone();
        let task = tokio::spawn(async move { worker.run(job).await });
        self.registry
            .register(job_id.clone(), JobHandle::from_task(job_id.clone(), task));

        debug!("Job {}: admitted", job_id);
        Ok(job_id)
    }

    /// Current state of `job_id`, from the filesystem alone.
    pub fn status(&self, job_id: &str) -> JobState {
        self.workspace.status(job_id)
    }

    /// Status of `job_id` as a transport-ready body.
    pub fn report(&self, job_id: &str) -> StatusReport {
        self.workspace.report(job_id)
    }

    /// Handle that resolves when `job_id`'s conversion attempt finishes.
    ///
    /// # Errors
    /// [`Doc2PdfError::UnknownJob`] if this process never admitted the job
    /// (or has evicted it). That is not the same as `invalid` status.
    pub fn await_completion(&self, job_id: &str) -> Result<JobHandle, Doc2PdfError> {
        self.registry.await_job(job_id)
    }

    /// Apply the configured retention: drop finished jobs older than
    /// `config.retention` from the registry and delete their workspaces.
    ///
    /// Does nothing when no retention is configured.
    ///
    /// # Errors
    /// The first workspace that could not be removed. Removal is still
    /// attempted for every evicted job; the others are logged.
    pub async fn evict_expired(&self) -> Result<Vec<JobId>, Doc2PdfError> {
        let Some(retention) = self.config.retention else {
            return Ok(Vec::new());
        };

        let evicted = self.registry.evict_finished_older_than(retention);
        let mut first_error = None;
        for job_id in &evicted {
            if let Err(e) = self.workspace.remove_job(job_id.as_str()).await {
                warn!("Job {}: failed to remove workspace: {}", job_id, e);
                first_error.get_or_insert(e);
            }
        }
        if !evicted.is_empty() {
            info!("Evicted {} finished jobs", evicted.len());
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(evicted),
        }
    }

    /// Stop starting conversions.
    ///
    /// Running conversions finish normally. Jobs still waiting for a slot
    /// resolve with [`JobFailure::Aborted`](crate::JobFailure::Aborted) and
    /// stay `pending` on disk. Later calls to [`submit`](Self::submit) fail
    /// with [`Doc2PdfError::ShutDown`].
    pub fn shutdown(&self) {
        if !self.limiter().is_closed() {
            info!("Conversion service shutting down");
            self.limiter().close();
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn limiter(&self) -> &ConcurrencyLimiter {
        self.worker.limiter()
    }

    /// Create a workspace under a fresh id, drawing a new id on collision.
    async fn allocate_workspace(&self, filename: &str) -> Result<JobWorkspace, Doc2PdfError> {
        self.allocate_workspace_with(filename, JobId::generate).await
    }

    async fn allocate_workspace_with(
        &self,
        filename: &str,
        mut next_id: impl FnMut() -> JobId,
    ) -> Result<JobWorkspace, Doc2PdfError> {
        for attempt in 1..=self.config.id_attempts {
            let job_id = next_id();
            match self.workspace.create_job_workspace(&job_id, filename).await {
                Ok(job) => return Ok(job),
                Err(Doc2PdfError::WorkspaceExists { path }) => {
                    warn!(
                        "Job id {} already taken ({}), attempt {}/{}",
                        job_id,
                        path.display(),
                        attempt,
                        self.config.id_attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(Doc2PdfError::IdSpaceExhausted {
            attempts: self.config.id_attempts,
        })
    }
}

impl std::fmt::Debug for ConversionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversionService")
            .field("config", &self.config)
            .field("jobs", &self.registry.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn service(work: &TempDir) -> ConversionService {
        let config = ServiceConfig::builder()
            .working_directory(work.path())
            .converter("/definitely/not/soffice")
            .build()
            .unwrap();
        ConversionService::new(config).await.unwrap()
    }

    #[tokio::test]
    async fn new_creates_working_directory() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("nested").join("work");
        let config = ServiceConfig::builder()
            .working_directory(&root)
            .build()
            .unwrap();
        ConversionService::new(config).await.unwrap();
        assert!(root.is_dir());
    }

    #[tokio::test]
    async fn submit_is_pending_immediately() {
        let work = TempDir::new().unwrap();
        let svc = service(&work).await;

        let id = svc.submit("letter.odt", b"hello").await.unwrap();
        assert_eq!(svc.status(id.as_str()), JobState::Pending);
        assert!(svc.registry().contains(id.as_str()));
        assert_eq!(
            std::fs::read(work.path().join(id.as_str()).join("document.odt")).unwrap(),
            b"hello"
        );
    }

    #[tokio::test]
    async fn spawn_failure_keeps_job_pending() {
        let work = TempDir::new().unwrap();
        let svc = service(&work).await;

        let id = svc.submit("letter.odt", b"hello").await.unwrap();
        let handle = svc.await_completion(id.as_str()).unwrap();
        let failure = handle.wait().await.unwrap_err();
        assert!(failure.to_string().contains("failed to spawn"), "got: {failure}");
        assert_eq!(svc.status(id.as_str()), JobState::Pending);
        assert_eq!(svc.limiter().available(), 2);
    }

    #[tokio::test]
    async fn unknown_job_differs_from_invalid_status() {
        let work = TempDir::new().unwrap();
        let svc = service(&work).await;

        // Workspace from "an earlier process": on disk, not in the registry.
        std::fs::create_dir_all(work.path().join("old42").join("output")).unwrap();
        assert_eq!(svc.status("old42"), JobState::Pending);
        assert!(matches!(
            svc.await_completion("old42"),
            Err(Doc2PdfError::UnknownJob { .. })
        ));

        assert_eq!(svc.status("nonexistent"), JobState::Invalid);
        assert_eq!(svc.report("nonexistent").message, "nonexistent doesn't exist");
    }

    #[tokio::test]
    async fn colliding_id_is_retried() {
        let work = TempDir::new().unwrap();
        let svc = service(&work).await;
        std::fs::create_dir(work.path().join("taken")).unwrap();

        let mut ids = vec![JobId::from("fresh"), JobId::from("taken")];
        let job = svc
            .allocate_workspace_with("a.docx", || ids.pop().unwrap())
            .await
            .unwrap();
        assert_eq!(job.job_id.as_str(), "fresh");
        assert!(work.path().join("fresh").join("output").is_dir());
    }

    #[tokio::test]
    async fn exhausted_id_space_is_reported() {
        let work = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .working_directory(work.path())
            .id_attempts(3)
            .build()
            .unwrap();
        let svc = ConversionService::new(config).await.unwrap();
        std::fs::create_dir(work.path().join("taken")).unwrap();

        let mut calls = 0;
        let err = svc
            .allocate_workspace_with("a.docx", || {
                calls += 1;
                JobId::from("taken")
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, Doc2PdfError::IdSpaceExhausted { attempts: 3 }),
            "got: {err:?}"
        );
        assert_eq!(calls, 3);
    }

    #[tokio::test]
    async fn evict_continues_past_a_failed_removal() {
        let work = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .working_directory(work.path())
            .converter("/definitely/not/soffice")
            .retention(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let svc = ConversionService::new(config).await.unwrap();

        let stuck = svc.submit("a.doc", b"x").await.unwrap();
        let other = svc.submit("b.doc", b"y").await.unwrap();
        for id in [&stuck, &other] {
            let _ = svc.await_completion(id.as_str()).unwrap().wait().await;
        }

        // A plain file where the job directory was cannot be removed as one.
        let stuck_dir = work.path().join(stuck.as_str());
        std::fs::remove_dir_all(&stuck_dir).unwrap();
        std::fs::write(&stuck_dir, b"").unwrap();

        let err = svc.evict_expired().await.unwrap_err();
        assert!(matches!(err, Doc2PdfError::WorkspaceIo { .. }), "got: {err:?}");
        assert_eq!(svc.status(other.as_str()), JobState::Invalid);
        assert!(svc.registry().is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_queued_jobs_and_refuses_new_ones() {
        let work = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .working_directory(work.path())
            .converter("/definitely/not/soffice")
            .concurrency(1)
            .build()
            .unwrap();
        let svc = ConversionService::new(config).await.unwrap();

        // Hold the only slot so the submitted job has to queue.
        let held = svc.limiter().try_acquire().unwrap();
        let queued = svc.submit("a.doc", b"x").await.unwrap();
        svc.shutdown();
        drop(held);

        let failure = svc
            .await_completion(queued.as_str())
            .unwrap()
            .wait()
            .await
            .unwrap_err();
        assert!(matches!(failure, crate::JobFailure::Aborted { .. }), "got: {failure:?}");
        assert_eq!(svc.status(queued.as_str()), JobState::Pending);

        let err = svc.submit("b.doc", b"y").await.unwrap_err();
        assert!(matches!(err, Doc2PdfError::ShutDown), "got: {err:?}");
    }

    #[tokio::test]
    async fn evict_without_retention_is_a_no_op() {
        let work = TempDir::new().unwrap();
        let svc = service(&work).await;
        let id = svc.submit("a.doc", b"x").await.unwrap();
        let _ = svc.await_completion(id.as_str()).unwrap().wait().await;

        assert!(svc.evict_expired().await.unwrap().is_empty());
        assert!(svc.registry().contains(id.as_str()));
    }

    #[tokio::test]
    async fn evict_with_retention_removes_finished_jobs() {
        let work = TempDir::new().unwrap();
        let config = ServiceConfig::builder()
            .working_directory(work.path())
            .converter("/definitely/not/soffice")
            .retention(std::time::Duration::ZERO)
            .build()
            .unwrap();
        let svc = ConversionService::new(config).await.unwrap();

        let id = svc.submit("a.doc", b"x").await.unwrap();
        let _ = svc.await_completion(id.as_str()).unwrap().wait().await;

        let evicted = svc.evict_expired().await.unwrap();
        assert_eq!(evicted, vec![id.clone()]);
        assert_eq!(svc.status(id.as_str()), JobState::Invalid);
        assert!(svc.await_completion(id.as_str()).is_err());
    }
}

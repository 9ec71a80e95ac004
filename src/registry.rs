//! In-process registry of running and finished conversions.
//!
//! The registry answers one question: "can I be told when job X finishes?"
//! It is **not** the source of truth for status. A job admitted by an
//! earlier process is unknown here but may well be `ok` on disk.

use crate::error::{Doc2PdfError, JobFailure};
use crate::job::JobId;
use crate::worker::ConversionOutcome;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::future::{Future, IntoFuture};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// What a [`JobHandle`] resolves to.
pub type JobResult = Result<ConversionOutcome, JobFailure>;

/// Awaitable completion of one conversion attempt.
///
/// Clones share the same underlying task; every clone resolves to the same
/// [`JobResult`]. Dropping all handles does not cancel the conversion.
#[derive(Clone)]
pub struct JobHandle {
    job_id: JobId,
    inner: Shared<BoxFuture<'static, JobResult>>,
}

impl JobHandle {
    /// Wrap a spawned conversion task.
    pub fn from_task(job_id: JobId, task: JoinHandle<JobResult>) -> Self {
        let id = job_id.clone();
        let inner = async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(JobFailure::Aborted {
                    job_id: id.into_string(),
                    detail: e.to_string(),
                }),
            }
        }
        .boxed()
        .shared();
        Self { job_id, inner }
    }

    /// A handle that is already resolved.
    pub fn ready(job_id: JobId, result: JobResult) -> Self {
        Self {
            job_id,
            inner: futures::future::ready(result).boxed().shared(),
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    /// The result, if the conversion has finished and someone has polled
    /// this handle (or a clone) since.
    pub fn peek(&self) -> Option<&JobResult> {
        self.inner.peek()
    }

    /// Whether the result is already available without waiting.
    pub fn is_finished(&self) -> bool {
        self.peek().is_some() || self.inner.clone().now_or_never().is_some()
    }

    /// Wait for the conversion to finish.
    pub fn wait(&self) -> impl Future<Output = JobResult> + Send + 'static {
        self.inner.clone()
    }
}

impl IntoFuture for JobHandle {
    type Output = JobResult;
    type IntoFuture = Shared<BoxFuture<'static, JobResult>>;

    fn into_future(self) -> Self::IntoFuture {
        self.inner
    }
}

impl std::fmt::Debug for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobHandle")
            .field("job_id", &self.job_id)
            .field("result", &self.peek())
            .finish()
    }
}

/// A registry entry.
#[derive(Debug, Clone)]
pub struct RegisteredJob {
    pub handle: JobHandle,
    pub admitted_at: Instant,
}

/// Thread-safe map from job id to completion handle.
///
/// Share it as `Arc<JobRegistry>`; all methods take `&self`.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<JobId, RegisteredJob>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `handle` under `job_id`, replacing any previous entry.
    pub fn register(&self, job_id: JobId, handle: JobHandle) {
        self.jobs.insert(
            job_id,
            RegisteredJob {
                handle,
                admitted_at: Instant::now(),
            },
        );
    }

    /// Handle for `job_id`, for callers that want to wait on completion.
    pub fn await_job(&self, job_id: &str) -> Result<JobHandle, Doc2PdfError> {
        self.jobs
            .get(job_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| Doc2PdfError::UnknownJob {
                job_id: job_id.to_string(),
            })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.jobs.contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Ids of every tracked job, sorted.
    pub fn job_ids(&self) -> Vec<JobId> {
        let mut ids: Vec<JobId> = self.jobs.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Drop entries that were admitted more than `age` ago and whose
    /// conversion has finished. Running jobs are never evicted.
    /// Returns the evicted ids, sorted.
    pub fn evict_finished_older_than(&self, age: Duration) -> Vec<JobId> {
        let expired: Vec<JobId> = self
            .jobs
            .iter()
            .filter(|e| e.admitted_at.elapsed() >= age && e.handle.is_finished())
            .map(|e| e.key().clone())
            .collect();

        let mut evicted: Vec<JobId> = expired
            .into_iter()
            .filter(|id| self.jobs.remove(id).is_some())
            .collect();
        evicted.sort();
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::oneshot;
    use tokio_test::{assert_err, assert_ok};

    fn exited() -> JobResult {
        Ok(ConversionOutcome::Exited {
            exit_code: Some(0),
            duration_ms: 5,
        })
    }

    #[test]
    fn unknown_job_is_a_lookup_error() {
        let registry = JobRegistry::new();
        let err = assert_err!(registry.await_job("nope0"));
        assert!(matches!(err, Doc2PdfError::UnknownJob { ref job_id } if job_id == "nope0"));
    }

    #[tokio::test]
    async fn registered_handle_resolves_for_every_waiter() {
        let registry = JobRegistry::new();
        let (tx, rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _ = rx.await;
            exited()
        });
        registry.register(JobId::from("wait1"), JobHandle::from_task(JobId::from("wait1"), task));

        let a = assert_ok!(registry.await_job("wait1"));
        let b = assert_ok!(registry.await_job("wait1"));
        assert!(!a.is_finished());

        let waiter = tokio::spawn(a.into_future());
        tx.send(()).unwrap();

        assert_eq!(waiter.await.unwrap(), exited());
        assert_eq!(b.wait().await, exited());
        assert!(b.is_finished());
    }

    #[tokio::test]
    async fn panicking_task_resolves_to_aborted() {
        let task = tokio::spawn(async move {
            if true {
                panic!("converter task blew up");
            }
            exited()
        });
        let handle = JobHandle::from_task(JobId::from("boom1"), task);
        let failure = handle.wait().await.unwrap_err();
        assert!(matches!(failure, JobFailure::Aborted { .. }), "got: {failure:?}");
        assert_eq!(failure.job_id(), "boom1");
    }

    #[tokio::test]
    async fn concurrent_registration_keeps_every_entry() {
        let registry = Arc::new(JobRegistry::new());
        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move {
                    let id = JobId::from(format!("job{i:02}"));
                    registry.register(id.clone(), JobHandle::ready(id, exited()));
                })
            })
            .collect();
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(registry.len(), 64);
        assert!(registry.contains("job63"));
    }

    #[tokio::test]
    async fn eviction_skips_running_jobs() {
        let registry = JobRegistry::new();
        registry.register(JobId::from("done1"), JobHandle::ready(JobId::from("done1"), exited()));

        let (_tx, rx) = oneshot::channel::<()>();
        let running = tokio::spawn(async move {
            let _ = rx.await;
            exited()
        });
        registry.register(
            JobId::from("busy1"),
            JobHandle::from_task(JobId::from("busy1"), running),
        );

        assert!(registry.evict_finished_older_than(Duration::from_secs(3600)).is_empty());

        let evicted = registry.evict_finished_older_than(Duration::ZERO);
        assert_eq!(evicted, vec![JobId::from("done1")]);
        assert!(!registry.contains("done1"));
        assert!(registry.contains("busy1"));
        assert_eq!(registry.job_ids(), vec![JobId::from("busy1")]);
    }
}

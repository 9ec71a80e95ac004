//! Callback trait for job lifecycle events.
//!
//! Inject an [`Arc<dyn JobEventCallback>`] via
//! [`crate::config::ServiceConfigBuilder::events`] to be told when jobs are
//! admitted, when their converter starts, and how it ended.
//!
//! The trait is `Send + Sync`: conversions run on spawned tasks, so events
//! for different jobs may arrive concurrently from different threads.
//!
//! # Example
//!
//! ```rust
//! use doc2pdf::{JobEventCallback, JobEvents, ServiceConfig};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct Finished(AtomicUsize);
//!
//! impl JobEventCallback for Finished {
//!     fn on_conversion_finished(&self, _job_id: &str, _outcome: &doc2pdf::ConversionOutcome) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let config = ServiceConfig::builder()
//!     .events(Arc::new(Finished(AtomicUsize::new(0))) as JobEvents)
//!     .build()
//!     .unwrap();
//! ```

use crate::error::JobFailure;
use crate::worker::ConversionOutcome;
use std::sync::Arc;

/// Observer of job lifecycle events. All methods default to no-ops.
pub trait JobEventCallback: Send + Sync {
    /// A submission was admitted: its workspace exists and its input is on disk.
    fn on_job_admitted(&self, job_id: &str, input_bytes: usize) {
        let _ = (job_id, input_bytes);
    }

    /// A limiter slot was acquired and the converter is about to be spawned.
    fn on_conversion_start(&self, job_id: &str) {
        let _ = job_id;
    }

    /// The converter exited or was killed on timeout.
    fn on_conversion_finished(&self, job_id: &str, outcome: &ConversionOutcome) {
        let _ = (job_id, outcome);
    }

    /// The conversion could not run at all.
    fn on_conversion_failed(&self, job_id: &str, failure: &JobFailure) {
        let _ = (job_id, failure);
    }
}

/// A no-op implementation, equivalent to configuring no callback.
pub struct NoopJobEvents;

impl JobEventCallback for NoopJobEvents {}

/// Convenience alias matching the type stored in [`crate::config::ServiceConfig`].
pub type JobEvents = Arc<dyn JobEventCallback>;

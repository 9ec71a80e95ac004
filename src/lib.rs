//! # doc2pdf
//!
//! Orchestrate office-document → PDF conversions performed by an external
//! converter (LibreOffice `soffice`).
//!
//! ## Why this crate?
//!
//! The converter does the hard part, but it is a poor neighbour: it is
//! memory hungry, refuses to share its user profile between processes, pops
//! up first-run dialogs, and now and then hangs forever on a malformed file.
//! This crate owns everything *around* the converter: admitting uploads,
//! bounding how many converters run at once, giving each run a private
//! profile, killing runs that exceed a deadline, and answering "is my PDF
//! ready yet?" from the filesystem.
//!
//! ## Job Lifecycle
//!
//! ```text
//! submit(filename, bytes)
//!  │
//!  ├─ 1. Admit    fresh job id, <workdir>/<id>/document.<ext>, <id>/output/
//!  ├─ 2. Queue    wait for a limiter slot (at most `concurrency` run at once)
//!  ├─ 3. Profile  private converter profile seeded with the bundled payload
//!  ├─ 4. Convert  soffice --headless --convert-to pdf, killed after `timeout`
//!  └─ 5. Release  slot returned, profile deleted, handle resolved
//!
//! status(id): invalid │ pending │ ok   ← derived from <id>/output/document.pdf
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use doc2pdf::{ConversionService, JobState, ServiceConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ServiceConfig::builder()
//!         .working_directory("/tmp/doc2pdf")
//!         .concurrency(2)
//!         .build()?;
//!     let service = ConversionService::new(config).await?;
//!
//!     let bytes = std::fs::read("report.docx")?;
//!     let job_id = service.submit("report.docx", &bytes).await?;
//!     assert_eq!(service.status(job_id.as_str()), JobState::Pending);
//!
//!     let outcome = service.await_completion(job_id.as_str())?.await;
//!     println!("{job_id}: {outcome:?} → {}", service.status(job_id.as_str()));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `doc2pdf` binary (clap + anyhow + tracing-subscriber + indicatif) |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod events;
pub mod job;
pub mod limiter;
pub mod registry;
pub mod service;
pub mod worker;
pub mod workspace;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ServiceConfig, ServiceConfigBuilder, DEFAULT_PROFILE_PAYLOAD};
pub use error::{Doc2PdfError, JobFailure};
pub use events::{JobEventCallback, JobEvents, NoopJobEvents};
pub use job::{JobId, JobState, StatusReport};
pub use limiter::{ConcurrencyLimiter, ConversionSlot};
pub use registry::{JobHandle, JobRegistry, JobResult};
pub use service::ConversionService;
pub use worker::{ConversionOutcome, ConversionWorker};
pub use workspace::{resolve_status, JobWorkspace, Workspace};

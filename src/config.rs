//! Configuration for the conversion service.
//!
//! Every knob lives in [`ServiceConfig`], built via its
//! [`ServiceConfigBuilder`]. The values are fixed once the service starts:
//! the concurrency limit in particular is baked into the limiter and never
//! changes for the lifetime of the process.

use crate::error::Doc2PdfError;
use crate::events::JobEvents;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Converter profile payload bundled with the crate.
///
/// Written into `<profile>/user/registrymodifications.xcu` for every
/// conversion so the converter never shows first-run dialogs, checks for
/// updates, or tries to restore crashed sessions.
pub const DEFAULT_PROFILE_PAYLOAD: &str = include_str!("../resources/soffice-registry.xcu");

/// Default location of the converter binary.
pub const DEFAULT_CONVERTER: &str = "/usr/local/bin/soffice";

/// Default root under which job workspaces are created.
pub const DEFAULT_WORKING_DIRECTORY: &str = "/tmp/doc2pdf";

/// Configuration for a [`crate::ConversionService`].
///
/// # Example
/// ```rust
/// use doc2pdf::ServiceConfig;
///
/// let config = ServiceConfig::builder()
///     .working_directory("/var/lib/doc2pdf")
///     .concurrency(4)
///     .timeout_secs(90)
///     .build()
///     .unwrap();
/// assert_eq!(config.concurrency, 4);
/// ```
#[derive(Clone)]
pub struct ServiceConfig {
    /// Root directory holding one subdirectory per job. Default: `/tmp/doc2pdf`.
    pub working_directory: PathBuf,

    /// Maximum number of converter processes running at once. Default: 2.
    ///
    /// The converter is memory hungry and single-threaded for most of a
    /// conversion, so a small number keeps the host responsive. Submissions
    /// beyond this limit are still admitted; they wait for a slot.
    pub concurrency: usize,

    /// Per-conversion wall-clock limit in seconds. Default: 60.
    ///
    /// A converter still running after this is killed. Its job stays
    /// `pending` forever because no PDF is ever written.
    pub timeout_secs: u64,

    /// Path (or bare name resolved through `PATH`) of the converter binary.
    /// Default: `/usr/local/bin/soffice`.
    pub converter: PathBuf,

    /// Payload written into each converter profile. Default: the bundled
    /// [`DEFAULT_PROFILE_PAYLOAD`].
    pub profile_payload: Arc<str>,

    /// Directory under which per-conversion profiles are created.
    /// If None, uses the system temp directory.
    pub profile_root: Option<PathBuf>,

    /// How many fresh job ids to try when a generated id collides with an
    /// existing workspace. Default: 8.
    pub id_attempts: u32,

    /// Age after which finished jobs are evicted by
    /// [`crate::ConversionService::evict_expired`]. Default: None (never).
    pub retention: Option<Duration>,

    /// Observer for job lifecycle events.
    pub events: Option<JobEvents>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            working_directory: PathBuf::from(DEFAULT_WORKING_DIRECTORY),
            concurrency: 2,
            timeout_secs: 60,
            converter: PathBuf::from(DEFAULT_CONVERTER),
            profile_payload: Arc::from(DEFAULT_PROFILE_PAYLOAD),
            profile_root: None,
            id_attempts: 8,
            retention: None,
            events: None,
        }
    }
}

impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field("working_directory", &self.working_directory)
            .field("concurrency", &self.concurrency)
            .field("timeout_secs", &self.timeout_secs)
            .field("converter", &self.converter)
            .field("profile_payload", &format_args!("<{} bytes>", self.profile_payload.len()))
            .field("profile_root", &self.profile_root)
            .field("id_attempts", &self.id_attempts)
            .field("retention", &self.retention)
            .field("events", &self.events.as_ref().map(|_| "<dyn JobEventCallback>"))
            .finish()
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }

    /// The conversion timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.working_directory = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn converter(mut self, program: impl Into<PathBuf>) -> Self {
        self.config.converter = program.into();
        self
    }

    pub fn profile_payload(mut self, payload: impl Into<String>) -> Self {
        self.config.profile_payload = Arc::from(payload.into());
        self
    }

    pub fn profile_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.profile_root = Some(dir.into());
        self
    }

    pub fn id_attempts(mut self, n: u32) -> Self {
        self.config.id_attempts = n.max(1);
        self
    }

    pub fn retention(mut self, age: Duration) -> Self {
        self.config.retention = Some(age);
        self
    }

    pub fn events(mut self, events: JobEvents) -> Self {
        self.config.events = Some(events);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, Doc2PdfError> {
        let c = &self.config;
        if c.timeout_secs == 0 {
            return Err(Doc2PdfError::InvalidConfig(
                "Timeout must be at least 1 second".into(),
            ));
        }
        if c.converter.as_os_str().is_empty() {
            return Err(Doc2PdfError::InvalidConfig(
                "Converter path must not be empty".into(),
            ));
        }
        if c.working_directory.as_os_str().is_empty() {
            return Err(Doc2PdfError::InvalidConfig(
                "Working directory must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

//! Per-conversion converter profile directories.
//!
//! The converter keeps its user profile in a directory it locks for the
//! duration of a run; two processes pointed at the same profile block or
//! crash each other. Every conversion therefore gets a brand-new temporary
//! profile seeded with the static registry payload, and loses it afterwards.
//!
//! ```text
//! <tmp>/doc2pdf-profile-<job_id>-XXXXXX/
//!   user/
//!     registrymodifications.xcu   ← ServiceConfig::profile_payload
//! ```

use crate::job::JobId;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Subdirectory the converter reads its user settings from.
pub const PROFILE_USER_DIR: &str = "user";

/// File the payload is written to inside [`PROFILE_USER_DIR`].
pub const PROFILE_REGISTRY_FILE: &str = "registrymodifications.xcu";

/// A job-scoped converter profile directory.
///
/// Removed by [`ConverterProfile::discard`], or on drop if the owning task
/// unwinds before getting there.
#[derive(Debug)]
pub struct ConverterProfile {
    dir: TempDir,
}

impl ConverterProfile {
    /// Create a fresh profile under `root` (or the system temp directory)
    /// and write `payload` into it.
    pub async fn create(root: Option<&Path>, job_id: &JobId, payload: &str) -> io::Result<Self> {
        let prefix = format!("doc2pdf-profile-{job_id}-");
        let root = root.map(Path::to_path_buf);
        let dir = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix(&prefix);
            match root {
                Some(root) => builder.tempdir_in(root),
                None => builder.tempdir(),
            }
        })
        .await
        .map_err(io::Error::other)??;

        let user_dir = dir.path().join(PROFILE_USER_DIR);
        tokio::fs::create_dir(&user_dir).await?;
        tokio::fs::write(user_dir.join(PROFILE_REGISTRY_FILE), payload).await?;

        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Value for the converter's `-env:UserInstallation=` switch.
    pub fn installation_url(&self) -> String {
        format!("file://{}", self.dir.path().display())
    }

    /// Remove the profile directory, reporting any failure.
    pub async fn discard(self) -> io::Result<PathBuf> {
        let path = self.dir.path().to_path_buf();
        tokio::task::spawn_blocking(move || self.dir.close())
            .await
            .map_err(io::Error::other)??;
        Ok(path)
    }
}

//! On-disk layout of job workspaces and the filesystem-derived job status.
//!
//! ```text
//! <working_directory>/<job_id>/document.<ext>
//! <working_directory>/<job_id>/output/document.pdf   (present iff conversion succeeded)
//! ```
//!
//! The layout is the only persisted state. Status is re-derived from it on
//! every query, so it survives restarts and can be shared with any other
//! process that follows the same convention.

use crate::error::Doc2PdfError;
use crate::job::{is_plain_component, JobId, JobState, StatusReport};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// Base name of the stored input file (the original extension is appended).
pub const INPUT_STEM: &str = "document";

/// Name of the per-job output subdirectory.
pub const OUTPUT_DIR: &str = "output";

/// Name of the PDF the converter writes into [`OUTPUT_DIR`].
pub const OUTPUT_PDF: &str = "document.pdf";

/// Paths belonging to one admitted job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobWorkspace {
    pub job_id: JobId,
    /// `<working_directory>/<job_id>`
    pub root: PathBuf,
    /// `<root>/document.<ext>`
    pub input_path: PathBuf,
    /// `<root>/output`
    pub output_dir: PathBuf,
}

impl JobWorkspace {
    /// Where the converter is expected to leave the PDF.
    pub fn pdf_path(&self) -> PathBuf {
        self.output_dir.join(OUTPUT_PDF)
    }
}

/// The working directory under which all job workspaces live.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the working directory if it does not exist yet.
    pub async fn ensure_root(&self) -> Result<(), Doc2PdfError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Doc2PdfError::io(&self.root, e))
    }

    /// `<working_directory>/<job_id>`
    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    /// `<working_directory>/<job_id>/output/document.pdf`
    pub fn pdf_path(&self, job_id: &str) -> PathBuf {
        self.job_dir(job_id).join(OUTPUT_DIR).join(OUTPUT_PDF)
    }

    /// Create `<job_id>/` and `<job_id>/output/`.
    ///
    /// The job directory is created with `create_dir`, not `create_dir_all`,
    /// so an id that is already taken fails with
    /// [`Doc2PdfError::WorkspaceExists`] instead of silently sharing a
    /// workspace with another job.
    pub async fn create_job_workspace(
        &self,
        job_id: &JobId,
        original_filename: &str,
    ) -> Result<JobWorkspace, Doc2PdfError> {
        let root = self.job_dir(job_id.as_str());
        match tokio::fs::create_dir(&root).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Doc2PdfError::WorkspaceExists { path: root });
            }
            Err(e) => return Err(Doc2PdfError::io(&root, e)),
        }

        self.populate_job_dir(job_id, root, original_filename).await
    }

    /// Lay out a freshly created job directory. On failure the directory is
    /// removed again so no half-built job lingers as `pending`.
    async fn populate_job_dir(
        &self,
        job_id: &JobId,
        root: PathBuf,
        original_filename: &str,
    ) -> Result<JobWorkspace, Doc2PdfError> {
        let output_dir = root.join(OUTPUT_DIR);
        if let Err(e) = tokio::fs::create_dir(&output_dir).await {
            if let Err(cleanup) = tokio::fs::remove_dir_all(&root).await {
                warn!("Job {}: failed to remove {}: {}", job_id, root.display(), cleanup);
            }
            return Err(Doc2PdfError::io(&output_dir, e));
        }

        let input_path = root.join(input_file_name(original_filename));
        debug!("Job {}: workspace {}", job_id, root.display());

        Ok(JobWorkspace {
            job_id: job_id.clone(),
            root,
            input_path,
            output_dir,
        })
    }

    /// Write the uploaded bytes verbatim.
    pub async fn write_input(&self, input_path: &Path, bytes: &[u8]) -> Result<(), Doc2PdfError> {
        tokio::fs::write(input_path, bytes)
            .await
            .map_err(|e| Doc2PdfError::io(input_path, e))
    }

    /// Derive the state of `job_id` from the filesystem.
    pub fn status(&self, job_id: &str) -> JobState {
        resolve_status(&self.root, job_id)
    }

    /// Status of `job_id` as a transport-ready body.
    pub fn report(&self, job_id: &str) -> StatusReport {
        let state = self.status(job_id);
        let pdf = match state {
            JobState::Ok => Some(self.pdf_path(job_id)),
            _ => None,
        };
        StatusReport::new(job_id, state, pdf)
    }

    /// Delete a job's whole subtree. A missing directory is not an error.
    pub async fn remove_job(&self, job_id: &str) -> Result<(), Doc2PdfError> {
        if !is_plain_component(job_id) {
            return Ok(());
        }
        let dir = self.job_dir(job_id);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Doc2PdfError::io(&dir, e)),
        }
    }

    /// Delete every job directory last modified more than `age` ago.
    ///
    /// Works purely from the filesystem, so it also clears workspaces left
    /// behind by earlier processes. Entries that are not directories are
    /// left alone. Returns the removed ids, sorted.
    pub async fn prune_older_than(&self, age: Duration) -> Result<Vec<String>, Doc2PdfError> {
        let cutoff = SystemTime::now()
            .checked_sub(age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| Doc2PdfError::io(&self.root, e))?;

        let mut removed = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Doc2PdfError::io(&self.root, e))?
        {
            let meta = match entry.metadata().await {
                Ok(m) if m.is_dir() => m,
                Ok(_) => continue,
                Err(e) => {
                    warn!("Skipping {}: {}", entry.path().display(), e);
                    continue;
                }
            };
            let modified = meta.modified().unwrap_or_else(|_| SystemTime::now());
            if modified > cutoff {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            self.remove_job(&name).await?;
            debug!("Pruned workspace {}", name);
            removed.push(name);
        }

        removed.sort();
        Ok(removed)
    }
}

/// Stored input name: `document` plus the original extension, if any.
///
/// Only the extension of the uploaded name survives; directories and the
/// stem are discarded, and a dotfile such as `.bashrc` has no extension.
pub fn input_file_name(original_filename: &str) -> String {
    match Path::new(original_filename)
        .extension()
        .and_then(|e| e.to_str())
    {
        Some(ext) if !ext.is_empty() => format!("{INPUT_STEM}.{ext}"),
        _ => INPUT_STEM.to_string(),
    }
}

/// Derive a job's state purely from the filesystem.
///
/// * `invalid`: no directory named `job_id` under `working_directory`
///   (including ids that are not a single plain path component)
/// * `ok`     : `job_id/output/document.pdf` exists
/// * `pending`: anything else
pub fn resolve_status(working_directory: &Path, job_id: &str) -> JobState {
    if !is_plain_component(job_id) {
        return JobState::Invalid;
    }
    let job_dir = working_directory.join(job_id);
    if !job_dir.is_dir() {
        return JobState::Invalid;
    }
    if job_dir.join(OUTPUT_DIR).join(OUTPUT_PDF).exists() {
        JobState::Ok
    } else {
        JobState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn input_name_keeps_only_extension() {
        assert_eq!(input_file_name("report.docx"), "document.docx");
        assert_eq!(input_file_name("Quarterly Report.final.xlsx"), "document.xlsx");
        assert_eq!(input_file_name("../../etc/passwd.odt"), "document.odt");
        assert_eq!(input_file_name("archive.tar.gz"), "document.gz");
        assert_eq!(input_file_name("README"), "document");
        assert_eq!(input_file_name(".bashrc"), "document");
        assert_eq!(input_file_name(""), "document");
    }

    #[test]
    fn status_of_missing_job_is_invalid() {
        let tmp = TempDir::new().unwrap();
        assert_eq!(resolve_status(tmp.path(), "nonexistent"), JobState::Invalid);
    }

    #[test]
    fn status_rejects_escaping_ids() {
        let tmp = TempDir::new().unwrap();
        let inner = tmp.path().join("work");
        std::fs::create_dir_all(inner.join("output")).unwrap();
        std::fs::write(inner.join("output").join(OUTPUT_PDF), b"%PDF").unwrap();

        // `..` from work/ reaches tmp/, which does exist as a directory.
        assert_eq!(resolve_status(&inner, ".."), JobState::Invalid);
        assert_eq!(resolve_status(&inner, "."), JobState::Invalid);
        assert_eq!(resolve_status(&inner, ""), JobState::Invalid);
        assert_eq!(resolve_status(tmp.path(), "work/output"), JobState::Invalid);
    }

    #[test]
    fn status_of_plain_file_is_invalid() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("abcde"), b"not a dir").unwrap();
        assert_eq!(resolve_status(tmp.path(), "abcde"), JobState::Invalid);
    }

    #[test]
    fn status_follows_filesystem() {
        let tmp = TempDir::new().unwrap();
        let job = tmp.path().join("j0b1d");
        std::fs::create_dir_all(job.join(OUTPUT_DIR)).unwrap();
        assert_eq!(resolve_status(tmp.path(), "j0b1d"), JobState::Pending);

        std::fs::write(job.join(OUTPUT_DIR).join(OUTPUT_PDF), b"%PDF-1.7").unwrap();
        assert_eq!(resolve_status(tmp.path(), "j0b1d"), JobState::Ok);

        std::fs::remove_dir_all(&job).unwrap();
        assert_eq!(resolve_status(tmp.path(), "j0b1d"), JobState::Invalid);
    }

    #[tokio::test]
    async fn create_job_workspace_lays_out_directories() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        let id = JobId::from("abc12");

        let job = ws.create_job_workspace(&id, "report.docx").await.unwrap();
        assert_eq!(job.root, tmp.path().join("abc12"));
        assert_eq!(job.input_path, tmp.path().join("abc12").join("document.docx"));
        assert_eq!(job.output_dir, tmp.path().join("abc12").join("output"));
        assert!(job.output_dir.is_dir());
        assert_eq!(job.pdf_path(), ws.pdf_path("abc12"));

        ws.write_input(&job.input_path, b"payload").await.unwrap();
        assert_eq!(std::fs::read(&job.input_path).unwrap(), b"payload");
        assert_eq!(ws.status("abc12"), JobState::Pending);
        assert!(ws.report("abc12").pdf.is_none());

        std::fs::write(job.pdf_path(), b"%PDF").unwrap();
        assert_eq!(ws.report("abc12").pdf, Some(job.pdf_path()));
    }

    #[tokio::test]
    async fn create_job_workspace_detects_collision() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        let id = JobId::from("dup00");

        ws.create_job_workspace(&id, "a.doc").await.unwrap();
        let err = ws.create_job_workspace(&id, "b.doc").await.unwrap_err();
        assert!(
            matches!(err, Doc2PdfError::WorkspaceExists { .. }),
            "got: {err:?}"
        );
    }

    #[tokio::test]
    async fn failed_layout_removes_job_directory() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        let id = JobId::from("half0");

        // A file squatting on `output` makes the directory creation fail.
        let root = tmp.path().join("half0");
        std::fs::create_dir(&root).unwrap();
        std::fs::write(root.join(OUTPUT_DIR), b"").unwrap();

        let err = ws.populate_job_dir(&id, root.clone(), "a.doc").await.unwrap_err();
        assert!(matches!(err, Doc2PdfError::WorkspaceIo { .. }), "got: {err:?}");
        assert!(!root.exists());
        assert_eq!(ws.status("half0"), JobState::Invalid);
    }

    #[tokio::test]
    async fn remove_job_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        let id = JobId::from("gone1");
        ws.create_job_workspace(&id, "x.odt").await.unwrap();

        ws.remove_job("gone1").await.unwrap();
        assert_eq!(ws.status("gone1"), JobState::Invalid);
        ws.remove_job("gone1").await.unwrap();
        ws.remove_job("..").await.unwrap();
        assert!(tmp.path().exists());
    }

    #[tokio::test]
    async fn prune_removes_only_old_directories() {
        let tmp = TempDir::new().unwrap();
        let ws = Workspace::new(tmp.path());
        ws.create_job_workspace(&JobId::from("old01"), "a.doc").await.unwrap();
        ws.create_job_workspace(&JobId::from("old02"), "b.doc").await.unwrap();
        std::fs::write(tmp.path().join("stray-file"), b"x").unwrap();

        // Nothing is older than an hour.
        let removed = ws.prune_older_than(Duration::from_secs(3600)).await.unwrap();
        assert!(removed.is_empty());

        let removed = ws.prune_older_than(Duration::ZERO).await.unwrap();
        assert_eq!(removed, vec!["old01".to_string(), "old02".to_string()]);
        assert!(tmp.path().join("stray-file").exists());
    }
}

//! CLI binary for doc2pdf.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ServiceConfig`, drives a local `ConversionService` and prints results.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use doc2pdf::{
    ConversionOutcome, ConversionService, JobEventCallback, JobEvents, JobFailure, JobState,
    ServiceConfig, StatusReport, Workspace,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI job-event callback using indicatif ───────────────────────────────────

/// Terminal progress: one bar over all submitted documents, plus a log line
/// per finished job. Jobs finish in any order.
struct CliJobEvents {
    bar: ProgressBar,
    running: AtomicUsize,
}

impl CliJobEvents {
    fn new(total: usize) -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} documents  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);

        let bar = ProgressBar::new(total as u64);
        bar.set_style(style);
        bar.set_prefix("Converting");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            running: AtomicUsize::new(0),
        })
    }

    fn show_running(&self) {
        let n = self.running.load(Ordering::SeqCst);
        self.bar.set_message(dim(&format!("{n} running")));
    }
}

impl JobEventCallback for CliJobEvents {
    fn on_job_admitted(&self, job_id: &str, input_bytes: usize) {
        self.bar.println(format!(
            "  {} {}  {}",
            dim("·"),
            bold(job_id),
            dim(&format!("{input_bytes} bytes queued"))
        ));
    }

    fn on_conversion_start(&self, _job_id: &str) {
        self.running.fetch_add(1, Ordering::SeqCst);
        self.show_running();
    }

    fn on_conversion_finished(&self, job_id: &str, outcome: &ConversionOutcome) {
        self.running.fetch_sub(1, Ordering::SeqCst);
        let line = match outcome {
            ConversionOutcome::Exited {
                exit_code,
                duration_ms,
            } => format!(
                "  {} {}  exit {}  {}",
                green("✓"),
                bold(job_id),
                exit_code.map_or_else(|| "signal".to_string(), |c| c.to_string()),
                dim(&format!("{:.1}s", *duration_ms as f64 / 1000.0)),
            ),
            ConversionOutcome::TimedOut { after_secs } => format!(
                "  {} {}  {}",
                yellow("⏱"),
                bold(job_id),
                yellow(&format!("killed after {after_secs}s")),
            ),
        };
        self.bar.println(line);
        self.bar.inc(1);
        self.show_running();
    }

    fn on_conversion_failed(&self, job_id: &str, failure: &JobFailure) {
        // Aborted jobs never reached `on_conversion_start`.
        if !matches!(failure, JobFailure::Aborted { .. }) {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }
        let msg = failure.to_string();
        let msg = if msg.chars().count() > 80 {
            format!("{}\u{2026}", msg.chars().take(79).collect::<String>())
        } else {
            msg
        };
        self.bar
            .println(format!("  {} {}  {}", red("✗"), bold(job_id), red(&msg)));
        self.bar.inc(1);
        self.show_running();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Convert two documents, two converters at a time (default)
  doc2pdf convert report.docx slides.pptx

  # One converter at a time, 2 minute limit per document
  doc2pdf --concurrency 1 --timeout 120 convert big.odt

  # Machine-readable results
  doc2pdf --json convert report.docx

  # Check on jobs (works across runs: status comes from the working directory)
  doc2pdf status k3x9a 0pq7z

  # Delete workspaces older than a day
  doc2pdf prune --older-than 86400

WORKING DIRECTORY LAYOUT:
  <workdir>/<job_id>/document.<ext>
  <workdir>/<job_id>/output/document.pdf     present iff the conversion succeeded

ENVIRONMENT VARIABLES:
  DOC2PDF_WORKDIR       Working directory (default /tmp/doc2pdf)
  DOC2PDF_CONCURRENCY   Concurrent converter processes (default 2)
  DOC2PDF_TIMEOUT       Per-document timeout in seconds (default 60)
  DOC2PDF_CONVERTER     Converter binary (default /usr/local/bin/soffice)
  RUST_LOG              Log filter, overrides -v / -q
"#;

/// Convert office documents to PDF with a bounded pool of headless converters.
#[derive(Parser, Debug)]
#[command(
    name = "doc2pdf",
    version,
    about = "Convert office documents to PDF with a bounded pool of headless converters",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Directory holding one subdirectory per job.
    #[arg(long, global = true, env = "DOC2PDF_WORKDIR", default_value = doc2pdf::config::DEFAULT_WORKING_DIRECTORY)]
    workdir: PathBuf,

    /// Maximum number of converter processes running at once.
    #[arg(short, long, global = true, env = "DOC2PDF_CONCURRENCY", default_value_t = 2,
          value_parser = clap::value_parser!(u64).range(1..))]
    concurrency: u64,

    /// Per-document timeout in seconds; slower converters are killed.
    #[arg(long, global = true, env = "DOC2PDF_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    timeout: u64,

    /// Converter binary.
    #[arg(long, global = true, env = "DOC2PDF_CONVERTER", default_value = doc2pdf::config::DEFAULT_CONVERTER)]
    converter: PathBuf,

    /// Path to a file replacing the bundled converter profile payload.
    #[arg(long, global = true, env = "DOC2PDF_PROFILE_PAYLOAD")]
    profile_payload: Option<PathBuf>,

    /// Output structured JSON status reports.
    #[arg(long, global = true, env = "DOC2PDF_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, global = true, env = "DOC2PDF_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs (includes converter output).
    #[arg(short, long, global = true, env = "DOC2PDF_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOC2PDF_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit documents and wait until every conversion has finished.
    Convert {
        /// Documents to convert.
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Print the status of existing jobs.
    Status {
        /// Job ids to look up.
        #[arg(required = true)]
        job_ids: Vec<String>,
    },

    /// Delete job workspaces older than the given age.
    Prune {
        /// Minimum age in seconds.
        #[arg(long)]
        older_than: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The progress bar replaces INFO logs during `convert`; -v brings them back.
    let show_progress = !cli.quiet
        && !cli.no_progress
        && !cli.json
        && matches!(cli.command, Command::Convert { .. });
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Convert { files } => run_convert(&cli, files, show_progress).await,
        Command::Status { job_ids } => run_status(&cli, job_ids),
        Command::Prune { older_than } => run_prune(&cli, *older_than).await,
    }
}

/// Submit every file, then wait for all of them.
async fn run_convert(cli: &Cli, files: &[PathBuf], show_progress: bool) -> Result<()> {
    let events = if show_progress {
        Some(CliJobEvents::new(files.len()))
    } else {
        None
    };
    let config = build_config(cli, events.clone().map(|e| e as JobEvents)).await?;
    let service = ConversionService::new(config)
        .await
        .context("Failed to start conversion service")?;

    // ── Admission ────────────────────────────────────────────────────────
    let mut submitted = Vec::with_capacity(files.len());
    for path in files {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let job_id = service
            .submit(&filename, &bytes)
            .await
            .with_context(|| format!("Failed to submit {}", path.display()))?;
        submitted.push((path, job_id));
    }

    // ── Completion ───────────────────────────────────────────────────────
    let handles = submitted
        .iter()
        .map(|(_, id)| service.await_completion(id.as_str()))
        .collect::<Result<Vec<_>, _>>()
        .context("Submitted job vanished from the registry")?;
    futures::future::join_all(handles.into_iter().map(|h| h.wait())).await;

    if let Some(ref events) = events {
        events.bar.finish_and_clear();
    }

    // ── Report ───────────────────────────────────────────────────────────
    let reports: Vec<StatusReport> = submitted
        .iter()
        .map(|(_, id)| service.report(id.as_str()))
        .collect();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
        );
    } else if !cli.quiet {
        for ((path, _), report) in submitted.iter().zip(&reports) {
            print_report(Some(path), report);
        }
    }

    let converted = reports.iter().filter(|r| r.status == JobState::Ok).count();
    if converted < reports.len() {
        anyhow::bail!(
            "{}/{} documents did not convert",
            reports.len() - converted,
            reports.len()
        );
    }
    Ok(())
}

/// Look up jobs on disk; no service (and no registry) is needed.
fn run_status(cli: &Cli, job_ids: &[String]) -> Result<()> {
    let workspace = Workspace::new(&cli.workdir);
    let reports: Vec<StatusReport> = job_ids.iter().map(|id| workspace.report(id)).collect();

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&reports).context("Failed to serialise reports")?
        );
    } else {
        for report in &reports {
            print_report(None, report);
        }
    }
    Ok(())
}

async fn run_prune(cli: &Cli, older_than: u64) -> Result<()> {
    let workspace = Workspace::new(&cli.workdir);
    let removed = workspace
        .prune_older_than(Duration::from_secs(older_than))
        .await
        .with_context(|| format!("Failed to prune {}", cli.workdir.display()))?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&removed).context("Failed to serialise ids")?
        );
    } else if !cli.quiet {
        for id in &removed {
            println!("removed {id}");
        }
        eprintln!("{} workspaces removed", removed.len());
    }
    Ok(())
}

fn print_report(source: Option<&PathBuf>, report: &StatusReport) {
    let marker = match report.status {
        JobState::Ok => green("✔"),
        JobState::Pending => yellow("…"),
        JobState::Invalid => red("✘"),
    };
    let source = source
        .map(|p| format!("{}  →  ", p.display()))
        .unwrap_or_default();
    match report.pdf {
        Some(ref pdf) => println!(
            "{marker} {source}{}  {}  {}",
            bold(&report.job_id),
            report.status,
            pdf.display()
        ),
        None => println!(
            "{marker} {source}{}  {}  {}",
            bold(&report.job_id),
            report.status,
            dim(&report.message)
        ),
    }
}

/// Map CLI args to `ServiceConfig`.
async fn build_config(cli: &Cli, events: Option<JobEvents>) -> Result<ServiceConfig> {
    let mut builder = ServiceConfig::builder()
        .working_directory(&cli.workdir)
        .concurrency(cli.concurrency as usize)
        .timeout_secs(cli.timeout)
        .converter(&cli.converter);

    if let Some(ref path) = cli.profile_payload {
        let payload = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read profile payload from {:?}", path))?;
        builder = builder.profile_payload(payload);
    }

    if let Some(events) = events {
        builder = builder.events(events);
    }

    builder.build().context("Invalid configuration")
}

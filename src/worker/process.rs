//! Spawning the converter and waiting on it under a deadline.
//!
//! Output is buffered, not streamed: the converter prints a line or two per
//! document, and the buffers only ever end up in debug logs.
//!
//! `soffice` is a launcher: it execs `oosplash`, which forks `soffice.bin`.
//! On unix the converter therefore runs as the leader of its own process
//! group, and the whole group is killed once the run is over, on timeout as
//! well as after a normal exit. No converter process outlives its conversion
//! slot or keeps its profile directory open after the profile is discarded.

use std::ffi::{OsStr, OsString};
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::warn;

/// How long to keep reading output after the converter exited.
const PIPE_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// How a converter run ended.
#[derive(Debug)]
pub enum ProcessRun {
    /// The process exited on its own within the deadline.
    Exited {
        status: ExitStatus,
        stdout: Vec<u8>,
        stderr: Vec<u8>,
    },
    /// The deadline passed; the process group was killed and the child
    /// reaped.
    TimedOut { pid: Option<u32> },
}

/// Why a converter run produced no exit status.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("spawn failed: {0}")]
    Spawn(#[source] io::Error),

    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),
}

/// Arguments for one conversion, in the order the converter expects them.
pub fn converter_args(installation_url: &str, output_dir: &Path, input_path: &Path) -> Vec<OsString> {
    vec![
        OsString::from(format!("-env:UserInstallation={installation_url}")),
        OsString::from("--headless"),
        OsString::from("--convert-to"),
        OsString::from("pdf"),
        OsString::from("--outdir"),
        output_dir.as_os_str().to_owned(),
        input_path.as_os_str().to_owned(),
    ]
}

/// Run `program` with `args`, capturing stdout/stderr, for at most `timeout`.
pub async fn run_converter<I, S>(
    program: &Path,
    args: I,
    timeout: Duration,
) -> Result<ProcessRun, ProcessError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(ProcessError::Spawn)?;

    let pid = child.id();
    // Pipes are read on their own tasks so the child never blocks on a full
    // pipe, and so a descendant holding them open cannot delay `wait`.
    let mut stdout = tokio::spawn(read_pipe(child.stdout.take()));
    let mut stderr = tokio::spawn(read_pipe(child.stderr.take()));

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => {
            // Whatever the converter left running goes with it.
            kill_process_group(pid);
            let stdout = drain_pipe(&mut stdout).await;
            let stderr = drain_pipe(&mut stderr).await;
            Ok(ProcessRun::Exited {
                status,
                stdout,
                stderr,
            })
        }
        Ok(Err(e)) => {
            kill_process_group(pid);
            let _ = child.start_kill();
            stdout.abort();
            stderr.abort();
            Err(ProcessError::Wait(e))
        }
        Err(_elapsed) => {
            kill_process_group(pid);
            // kill() also waits, so the child is reaped here.
            let killed = child.kill().await;
            stdout.abort();
            stderr.abort();
            killed.map_err(ProcessError::Wait)?;
            Ok(ProcessRun::TimedOut { pid })
        }
    }
}

/// SIGKILL every process in the group led by `pid`.
#[cfg(unix)]
fn kill_process_group(pid: Option<u32>) {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid.and_then(|p| i32::try_from(p).ok()) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        // Nothing left in the group.
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!("Failed to kill converter process group {}: {}", pid, e),
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: Option<u32>) {}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> io::Result<Vec<u8>> {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        pipe.read_to_end(&mut buf).await?;
    }
    Ok(buf)
}

/// Collect a pipe reader's output, giving up after [`PIPE_DRAIN_GRACE`].
async fn drain_pipe(task: &mut JoinHandle<io::Result<Vec<u8>>>) -> Vec<u8> {
    match tokio::time::timeout(PIPE_DRAIN_GRACE, &mut *task).await {
        Ok(Ok(Ok(buf))) => buf,
        Ok(Ok(Err(e))) => {
            warn!("Failed to read converter output: {}", e);
            Vec::new()
        }
        Ok(Err(_join)) => Vec::new(),
        Err(_elapsed) => {
            task.abort();
            Vec::new()
        }
    }
}

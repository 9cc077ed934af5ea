//! Running external command-line tools.
//!
//! Rasterizers, recognition engines, encoders and validators are all separate binaries. They
//! share one runner so that spawning, timeouts and stderr reporting behave the same everywhere.

use crate::{PalimpsestError, Result};
use std::ffi::OsStr;
use std::process::Stdio;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tokio_util::sync::CancellationToken;

/// Timeout used when probing whether a tool is installed.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Captured result of a finished tool.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub success: bool,
    pub code: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ToolOutput {
    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }
}

/// Run `program` with `args` and wait for it, up to `limit` or until `cancel` fires.
///
/// A missing executable becomes [`PalimpsestError::MissingDependency`]. A timeout becomes an
/// engine error and cancellation a cancelled error; in both cases the child is killed when its
/// handle is dropped.
pub async fn run_tool<I, S>(program: &str, args: I, limit: Duration, cancel: &CancellationToken) -> Result<ToolOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                PalimpsestError::MissingDependency(format!("'{}' is not installed or not on PATH", program))
            } else {
                // Spawn failures other than NotFound are IO errors
                PalimpsestError::Io(std::io::Error::other(format!("Failed to execute {}: {}", program, e)))
            }
        })?;

    let waited = tokio::select! {
        _ = cancel.cancelled() => {
            tracing::debug!(program, "Tool cancelled");
            return Err(PalimpsestError::cancelled(format!("{} was stopped", program)));
        }
        waited = timeout(limit, child.wait_with_output()) => waited,
    };

    let output = match waited {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return Err(std::io::Error::other(format!("Failed to wait for {}: {}", program, e)).into()),
        Err(_) => {
            return Err(PalimpsestError::engine(format!(
                "{} timed out after {} seconds",
                program,
                limit.as_secs()
            )));
        }
    };

    tracing::trace!(program, status = ?output.status, "Tool finished");

    Ok(ToolOutput {
        success: output.status.success(),
        code: output.status.code(),
        stdout: output.stdout,
        stderr: output.stderr,
    })
}

/// Check whether `program` runs at all, e.g. with `--version`.
pub async fn probe_tool(program: &str, args: &[&str]) -> bool {
    match run_tool(program, args, PROBE_TIMEOUT, &CancellationToken::new()).await {
        Ok(output) => output.success,
        Err(e) => {
            tracing::debug!(program, error = %e, "Tool probe failed");
            false
        }
    }
}

/// Last few non-empty stderr lines, for error messages.
pub fn stderr_tail(stderr: &[u8], lines: usize) -> String {
    let text = String::from_utf8_lossy(stderr);
    let tail: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = tail.len().saturating_sub(lines);
    tail[start..].join("\n")
}

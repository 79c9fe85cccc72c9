//! Bounded execution of one script inside its isolated runtime.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

use tokio::process::Command;
use tracing::{debug, instrument, warn};

use pysched_core::types::ExecutionStatus;

use crate::workspace::ScriptWorkspace;

/// Why an attempt failed. Absent from a successful outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    /// The script ran to completion with a non-zero exit code.
    NonZeroExit(i32),
    /// The wall-clock limit expired and the process was killed.
    Timeout { limit_secs: u64 },
    /// The process never started (missing interpreter, unwritable
    /// workspace, spawn error).
    Launch(String),
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunFailure::NonZeroExit(code) => write!(f, "exited with code {code}"),
            RunFailure::Timeout { limit_secs } => {
                write!(f, "timed out after {limit_secs}s and was terminated")
            }
            RunFailure::Launch(reason) => write!(f, "failed to launch: {reason}"),
        }
    }
}

/// Everything one attempt produced. Captured in full; callers truncate
/// before persisting.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
    pub failure: Option<RunFailure>,
}

impl RunOutcome {
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// The terminal ledger status for this outcome.
    pub fn status(&self) -> ExecutionStatus {
        if self.is_success() {
            ExecutionStatus::Success
        } else {
            ExecutionStatus::Failed
        }
    }

    fn launch_failure(reason: String, duration_ms: u64) -> Self {
        Self {
            exit_code: None,
            stdout: String::new(),
            stderr: reason.clone(),
            duration_ms,
            failure: Some(RunFailure::Launch(reason)),
        }
    }
}

/// Execute `source` inside the workspace's virtualenv.
///
/// The source text is written to the workspace first — what ran is exactly
/// what the caller passed, decoupled from later edits. `env_vars` (validated
/// upstream) are merged over the daemon's own environment. The timeout is a
/// hard bound: on expiry the child is killed and the outcome carries a
/// [`RunFailure::Timeout`].
///
/// Never touches the store and never returns an error — every way an attempt
/// can go wrong is encoded in the [`RunOutcome`].
#[instrument(skip(source, env_vars), fields(dir = %workspace.dir().display()))]
pub async fn run(
    workspace: &ScriptWorkspace,
    source: &str,
    env_vars: &BTreeMap<String, String>,
    timeout: Duration,
) -> RunOutcome {
    let started = Instant::now();

    if let Err(e) = tokio::fs::create_dir_all(workspace.dir()).await {
        return RunOutcome::launch_failure(
            format!("cannot create workspace: {e}"),
            elapsed_ms(started),
        );
    }
    if let Err(e) = tokio::fs::write(workspace.script_file(), source).await {
        return RunOutcome::launch_failure(
            format!("cannot write script source: {e}"),
            elapsed_ms(started),
        );
    }

    let python = workspace.python();
    if !python.exists() {
        return RunOutcome::launch_failure(
            "python executable not found in virtualenv".to_string(),
            elapsed_ms(started),
        );
    }

    // timeout() drops the output future on expiry, which kills the child.
    let result = tokio::time::timeout(
        timeout,
        Command::new(&python)
            .arg(workspace.script_file())
            .current_dir(workspace.dir())
            .envs(env_vars)
            .output(),
    )
    .await;

    let duration_ms = elapsed_ms(started);

    match result {
        Err(_) => {
            let limit_secs = timeout.as_secs();
            warn!(limit_secs, "execution timed out — process killed");
            RunOutcome {
                exit_code: None,
                stdout: String::new(),
                stderr: format!("execution timed out after {limit_secs}s"),
                duration_ms,
                failure: Some(RunFailure::Timeout { limit_secs }),
            }
        }
        Ok(Err(e)) => RunOutcome::launch_failure(format!("spawn failed: {e}"), duration_ms),
        Ok(Ok(out)) => {
            let exit_code = out.status.code();
            let stdout = String::from_utf8_lossy(&out.stdout).to_string();
            let stderr = String::from_utf8_lossy(&out.stderr).to_string();
            let failure = match exit_code {
                Some(0) => None,
                Some(code) => Some(RunFailure::NonZeroExit(code)),
                // Killed by a signal: no exit code to report.
                None => Some(RunFailure::NonZeroExit(-1)),
            };

            debug!(?exit_code, duration_ms, "execution finished");
            RunOutcome {
                exit_code,
                stdout,
                stderr,
                duration_ms,
                failure,
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

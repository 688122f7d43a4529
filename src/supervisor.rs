//! Child-process supervision for `spa run command`.
//!
//! Spawns the project's server command with the `SERVER_*` environment
//! overlaid, waits for it, and on cancellation forwards SIGINT before falling
//! back to a hard kill once the grace period has passed. No retries.

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::SpaError;

/// Exit code shells report for a process ended by SIGINT.
const SIGINT_EXIT_CODE: i32 = 130;

/// How a supervised child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorOutcome {
    /// Exited with status 0.
    Completed,
    /// Interrupted by the user, or ended by SIGINT.
    Cancelled,
    /// Any other exit. `-1` when no code is available.
    Failed(i32),
}

impl SupervisorOutcome {
    fn from_status(status: ExitStatus) -> Self {
        if status.success() {
            return SupervisorOutcome::Completed;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if status.signal() == Some(nix::sys::signal::Signal::SIGINT as i32) {
                return SupervisorOutcome::Cancelled;
            }
        }
        match status.code() {
            Some(SIGINT_EXIT_CODE) => SupervisorOutcome::Cancelled,
            Some(code) => SupervisorOutcome::Failed(code),
            None => SupervisorOutcome::Failed(-1),
        }
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGINT) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(pid = pid, error = %e, "failed to send SIGINT");
            false
        }
    }
}

#[cfg(not(unix))]
fn interrupt(_child: &Child) -> bool {
    false
}

/// Run `command` in `dir` with `env` overlaid until it exits or `cancel` fires.
pub async fn supervise(
    command: &[String],
    dir: &Path,
    env: &[(String, String)],
    grace: Duration,
    cancel: CancellationToken,
) -> crate::Result<SupervisorOutcome> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| SpaError::Supervisor("no command to run".to_string()))?;

    let mut child = Command::new(program)
        .args(args)
        .current_dir(dir)
        .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| SpaError::Supervisor(format!("failed to spawn '{}': {}", program, e)))?;

    tracing::info!(
        command = %command.join(" "),
        pid = child.id().unwrap_or_default(),
        "server process started"
    );

    tokio::select! {
        status = child.wait() => {
            let status = status.map_err(|e| SpaError::Supervisor(e.to_string()))?;
            let outcome = SupervisorOutcome::from_status(status);
            tracing::info!(outcome = ?outcome, "server process exited");
            return Ok(outcome);
        }
        _ = cancel.cancelled() => {}
    }

    if interrupt(&child) {
        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => {
                tracing::info!(status = %status, "server process stopped");
                return Ok(SupervisorOutcome::Cancelled);
            }
            Ok(Err(e)) => return Err(SpaError::Supervisor(e.to_string())),
            Err(_) => {
                tracing::warn!(
                    grace_secs = grace.as_secs(),
                    "server process ignored interrupt, killing"
                );
            }
        }
    }

    child
        .kill()
        .await
        .map_err(|e| SpaError::Supervisor(format!("failed to kill server process: {}", e)))?;
    Ok(SupervisorOutcome::Cancelled)
}

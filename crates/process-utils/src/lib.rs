//! Small process-related helpers shared across the workspace.

use std::ffi::OsStr;
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn tokio_command(program: impl AsRef<OsStr>) -> Command {
    let mut cmd = Command::new(program);
    cmd.no_window();
    cmd
}

/// Spawn a task that waits for a process to exit and sends the result
/// through a oneshot channel.
///
/// If the cancellation token is triggered, the process is stopped with the
/// given grace period and `None` is sent through the channel. Otherwise the
/// channel receives `Some(exit_code)` when the process exits on its own;
/// a non-zero live exit is logged as a warning.
pub fn spawn_process_waiter(
    mut child: Child,
    cancellation_token: CancellationToken,
    grace: Duration,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = cancellation_token.cancelled() => {
                stop_gracefully(&mut child, grace).await;
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => {
                        let code = exit_status.code();
                        if let Some(c) = code
                            && c != 0
                        {
                            warn!("Process exited with code: {}", c);
                        }
                        code
                    }
                    Err(e) => {
                        error!("Error waiting for process: {}", e);
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}

/// Stop a child process: ask it to terminate, give it a grace period, then
/// force-kill if it is still alive.
///
/// On unix the ask is a `SIGTERM`; elsewhere the process is killed outright.
pub async fn stop_gracefully(child: &mut Child, grace: Duration) {
    #[cfg(unix)]
    if let Some(pid) = child.id() {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        if let Err(e) = kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            debug!(pid, error = %e, "SIGTERM delivery failed");
        } else {
            match tokio::time::timeout(grace, child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(pid, ?status, "process terminated within grace period");
                    return;
                }
                Ok(Err(e)) => {
                    error!(pid, error = %e, "error waiting for terminating process");
                    return;
                }
                Err(_) => warn!(pid, "process ignored terminate signal, killing"),
            }
        }
    }

    #[cfg(not(unix))]
    let _ = grace;

    if let Err(e) = child.kill().await {
        debug!(error = %e, "kill failed (process likely already gone)");
    }
}

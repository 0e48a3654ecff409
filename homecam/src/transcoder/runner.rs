use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Grace period between asking a transcoder to terminate and killing it.
pub const STOP_GRACE: Duration = Duration::from_secs(2);

/// A running transcoder subprocess bound to a cancellation token.
///
/// Cancelling the token stops the process with the standard grace policy;
/// the exit watcher reports `None` for an intentional stop so it is never
/// logged as an unexpected exit.
#[derive(Debug)]
pub struct TranscoderProcess {
    token: CancellationToken,
    stdin: Option<ChildStdin>,
    exit_rx: oneshot::Receiver<Option<i32>>,
}

/// Spawn a transcoder with the given argument list.
///
/// stdout is discarded (output goes to the loopback socket), stderr is
/// drained by a diagnostics reader task. With `pipe_stdin` the caller gets
/// the child's stdin to feed a container stream into.
pub fn spawn(
    program: &str,
    args: &[String],
    token: CancellationToken,
    pipe_stdin: bool,
) -> Result<TranscoderProcess> {
    debug!(program, ?args, "spawning transcoder");

    let mut cmd = process_utils::tokio_command(program);
    cmd.args(args)
        .stdin(if pipe_stdin {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| Error::ProcessSpawn {
        program: program.to_string(),
        source: e,
    })?;

    if let Some(stderr) = child.stderr.take() {
        let diag_token = token.clone();
        let program = program.to_string();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            loop {
                tokio::select! {
                    _ = diag_token.cancelled() => break,
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            if line.contains("Error") || line.contains("error") {
                                warn!(program, "{line}");
                            } else {
                                debug!(program, "{line}");
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(program, error = %e, "diagnostics reader stopped");
                            break;
                        }
                    }
                }
            }
        });
    }

    let stdin = if pipe_stdin { child.stdin.take() } else { None };
    let exit_rx = process_utils::spawn_process_waiter(child, token.clone(), STOP_GRACE);

    Ok(TranscoderProcess {
        token,
        stdin,
        exit_rx,
    })
}

impl TranscoderProcess {
    /// Take the piped stdin handle, if the process was spawned with one.
    pub fn take_stdin(&mut self) -> Option<ChildStdin> {
        self.stdin.take()
    }

    /// Cancel and wait for teardown. Returns the exit code for a natural
    /// exit, `None` when the process was stopped by the cancellation.
    pub async fn stop(self) -> Option<i32> {
        self.token.cancel();
        self.exit_rx.await.ok().flatten()
    }
}

//! Process-execution collaborator.
//!
//! The engine never touches `tokio::process` directly outside this module;
//! tools and the background registry go through `ProcessSpawner`, which
//! keeps the bookkeeping testable with fake processes.

use std::path::Path;
use std::process::Stdio;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Exit status reported once a spawned process finishes.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub success: bool,
}

/// Handles for one spawned process.
///
/// `output` yields interleaved stdout/stderr chunks and closes when both
/// streams are drained; `exit` resolves once with the final status, after
/// the output channel closes.
pub struct SpawnedProcess {
    pub pid: Option<u32>,
    pub output: mpsc::UnboundedReceiver<String>,
    pub exit: oneshot::Receiver<ExitStatus>,
}

/// Spawns OS processes on behalf of the engine.
#[async_trait]
pub trait ProcessSpawner: Send + Sync {
    async fn spawn(&self, command: &str, working_dir: &Path) -> Result<SpawnedProcess>;

    /// Signal a previously spawned process (and its group) to terminate.
    /// Best effort; must not block.
    fn terminate(&self, pid: u32);
}

/// Real spawner backed by `tokio::process`.
pub struct TokioSpawner;

#[async_trait]
impl ProcessSpawner for TokioSpawner {
    async fn spawn(&self, command: &str, working_dir: &Path) -> Result<SpawnedProcess> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command);
            // New process group so the whole tree can be signalled
            #[cfg(unix)]
            c.process_group(0);
            c
        };

        cmd.current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd.spawn()?;
        let pid = child.id();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (exit_tx, exit_rx) = oneshot::channel();

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        tokio::spawn(async move {
            let stdout_task = stdout.map(|s| tokio::spawn(read_lines(s, out_tx.clone())));
            let stderr_task = stderr.map(|s| tokio::spawn(read_lines(s, out_tx)));

            let status = child.wait().await;

            if let Some(task) = stdout_task {
                let _ = task.await;
            }
            if let Some(task) = stderr_task {
                let _ = task.await;
            }

            let exit = match status {
                Ok(status) => ExitStatus {
                    code: status.code(),
                    success: status.success(),
                },
                Err(e) => {
                    tracing::warn!("failed to wait on child process: {e}");
                    ExitStatus {
                        code: None,
                        success: false,
                    }
                }
            };
            let _ = exit_tx.send(exit);
        });

        Ok(SpawnedProcess {
            pid,
            output: out_rx,
            exit: exit_rx,
        })
    }

    fn terminate(&self, pid: u32) {
        #[cfg(unix)]
        {
            // Kill the whole process group first (the child is a group
            // leader via process_group(0)), falling back to the single pid.
            let pgid = format!("-{pid}");
            let result = std::process::Command::new("kill")
                .arg("-TERM")
                .arg(&pgid)
                .output();

            if result.is_err() {
                let _ = std::process::Command::new("kill")
                    .arg("-TERM")
                    .arg(pid.to_string())
                    .output();
            }
        }
        #[cfg(windows)]
        {
            // /T kills the process tree
            let _ = std::process::Command::new("taskkill")
                .args(["/PID", &pid.to_string(), "/T", "/F"])
                .output();
        }
    }
}

async fn read_lines<R: AsyncRead + Unpin>(stream: R, tx: mpsc::UnboundedSender<String>) {
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if tx.send(line + "\n").is_err() {
            break;
        }
    }
}

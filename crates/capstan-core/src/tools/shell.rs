//! Shell tool - execute commands with output capture and optional
//! promotion to the background task registry.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::process::{ExitStatus, ProcessSpawner};
use crate::tools::{parse_arguments, Tool, ToolContext, ToolResult};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(120);

pub struct ShellTool {
    spawner: Arc<dyn ProcessSpawner>,
}

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    background: bool,
    #[serde(default)]
    description: Option<String>,
    /// Foreground timeout override, in seconds.
    #[serde(default)]
    timeout: Option<u64>,
}

impl ShellTool {
    pub fn new(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self { spawner }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> ToolResult {
        let params: Params = match parse_arguments(arguments) {
            Ok(p) => p,
            Err(result) => return result,
        };

        let spawned = match self.spawner.spawn(&params.command, &ctx.working_dir).await {
            Ok(spawned) => spawned,
            Err(e) => return ToolResult::error(format!("Failed to spawn command: {e}")),
        };

        if params.background {
            let id = ctx
                .background
                .promote(params.command, params.description, spawned)
                .await;
            return ToolResult::success(format!(
                "Started background task {id}. Output is collected while it runs."
            ));
        }

        let timeout = params
            .timeout
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_COMMAND_TIMEOUT);
        self.run_foreground(spawned, timeout, ctx).await
    }
}

impl ShellTool {
    async fn run_foreground(
        &self,
        mut spawned: crate::process::SpawnedProcess,
        timeout: Duration,
        ctx: &ToolContext,
    ) -> ToolResult {
        let mut buffer = String::new();
        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    if let Some(pid) = spawned.pid {
                        self.spawner.terminate(pid);
                    }
                    return ToolResult::error("Command canceled");
                }
                _ = &mut deadline => {
                    if let Some(pid) = spawned.pid {
                        self.spawner.terminate(pid);
                    }
                    return ToolResult::error(format!(
                        "Command timed out after {} seconds",
                        timeout.as_secs()
                    ));
                }
                chunk = spawned.output.recv() => match chunk {
                    Some(chunk) => buffer.push_str(&chunk),
                    None => break,
                },
            }
        }

        let status = spawned.exit.await.unwrap_or(ExitStatus {
            code: None,
            success: false,
        });

        if status.success {
            ToolResult::success(buffer)
        } else {
            let code = status
                .code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            if !buffer.is_empty() && !buffer.ends_with('\n') {
                buffer.push('\n');
            }
            buffer.push_str(&format!("Exit code: {code}"));
            ToolResult::error(buffer)
        }
    }
}

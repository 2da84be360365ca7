//! Tool execution supervision.
//!
//! Calls within one batch run concurrently; results are correlated back to
//! their calls strictly by id, never by completion order. A failed tool
//! yields a failed outcome and the turn proceeds - the provider, not this
//! engine, decides what happens next.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::process::BackgroundRegistry;
use crate::tools::{truncate_output, Tool, ToolContext, DEFAULT_MAX_TOOL_OUTPUT_CHARS};
use crate::transcript::{ToolCall, ToolOutcome};

/// Dispatches tool calls and shapes their results into outcomes.
pub struct ToolSupervisor {
    tools: HashMap<String, Arc<dyn Tool>>,
    working_dir: PathBuf,
    background: Arc<BackgroundRegistry>,
    output_limit: usize,
}

impl ToolSupervisor {
    pub fn new(working_dir: PathBuf, background: Arc<BackgroundRegistry>) -> Self {
        Self {
            tools: HashMap::new(),
            working_dir,
            background,
            output_limit: DEFAULT_MAX_TOOL_OUTPUT_CHARS,
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Cap on a single tool's output before it is handed back.
    pub fn set_output_limit(&mut self, max_chars: usize) {
        self.output_limit = max_chars;
    }

    /// Spawn one task per call into `in_flight`. Unknown tools resolve
    /// immediately as failed outcomes.
    pub(crate) fn dispatch(
        &self,
        calls: Vec<ToolCall>,
        in_flight: &mut JoinSet<ToolOutcome>,
        cancel: CancellationToken,
    ) {
        for call in calls {
            let Some(tool) = self.tools.get(&call.name).cloned() else {
                tracing::warn!(id = %call.id, name = %call.name, "unknown tool requested");
                let outcome = ToolOutcome::error(call.id, format!("Unknown tool: {}", call.name));
                in_flight.spawn(async move { outcome });
                continue;
            };

            let ctx = ToolContext {
                working_dir: self.working_dir.clone(),
                background: Arc::clone(&self.background),
                cancel: cancel.clone(),
            };
            let output_limit = self.output_limit;
            in_flight.spawn(async move {
                let result = tool.execute(call.arguments, &ctx).await;
                ToolOutcome {
                    id: call.id,
                    output: truncate_output(&result.output, output_limit),
                    is_error: result.is_error,
                }
            });
        }
    }
}

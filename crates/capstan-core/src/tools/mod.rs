//! Tool surface for the turn engine.
//!
//! Tools are dispatched by the supervisor; each call runs independently
//! and reports a `ToolResult` that is correlated back to its call by id.

pub mod shell;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::process::BackgroundRegistry;

/// Default cap on tool output handed back to the provider; the supervisor
/// takes an explicit limit so callers can size it.
pub const DEFAULT_MAX_TOOL_OUTPUT_CHARS: usize = 30_000;

/// Result of one tool execution. `output` carries the error text when
/// `is_error` is set.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub output: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            is_error: false,
        }
    }

    pub fn error(msg: impl std::fmt::Display) -> Self {
        Self {
            output: msg.to_string(),
            is_error: true,
        }
    }
}

/// Context for tool execution.
#[derive(Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub background: Arc<BackgroundRegistry>,
    /// The turn's cancellation token; tools observe it at await points.
    pub cancel: CancellationToken,
}

/// A dispatchable tool.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id).
    fn name(&self) -> &str;

    /// Execute the tool. Failures are reported through the result, never
    /// panics; a failed tool does not abort its batch or the turn.
    async fn execute(&self, arguments: Value, ctx: &ToolContext) -> ToolResult;
}

/// Deserialize tool arguments, mapping failures to a tool error result.
pub fn parse_arguments<T: serde::de::DeserializeOwned>(arguments: Value) -> Result<T, ToolResult> {
    serde_json::from_value(arguments)
        .map_err(|e| ToolResult::error(format!("Invalid parameters: {e}")))
}

/// Cap oversized tool output, cutting at a char boundary and backing up to
/// the last newline so the tail reads cleanly.
pub(crate) fn truncate_output(output: &str, max_chars: usize) -> String {
    if output.len() <= max_chars {
        return output.to_string();
    }

    let truncated_len = floor_char_boundary(output, max_chars);
    let truncated = &output[..truncated_len];
    let break_point = truncated.rfind('\n').unwrap_or(truncated_len);
    let clean = &output[..break_point];
    format!(
        "{}\n\n[... OUTPUT TRUNCATED: {} chars -> {} chars ...]",
        clean,
        output.len(),
        clean.len()
    )
}

fn floor_char_boundary(text: &str, index: usize) -> usize {
    let mut boundary = index.min(text.len());
    while boundary > 0 && !text.is_char_boundary(boundary) {
        boundary -= 1;
    }
    boundary
}

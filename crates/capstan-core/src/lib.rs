//! Capstan Core
//!
//! Turn-execution engine for a streaming agent loop. One submission at a
//! time flows from a user entry through a provider response stream into an
//! ordered transcript, with concurrent tool execution, a background task
//! registry that outlives turns, cooperative cancellation, and
//! retry/continue controls. Everything is observable through transcript
//! snapshots and side-channel signals; there is no presentation layer
//! here.

pub mod error;
pub mod process;
pub mod provider;
pub mod tools;
pub mod transcript;
pub mod turn;

pub use error::{EngineError, RegistryError, SubmitError};
pub use process::{BackgroundRegistry, ProcessSpawner, TaskInfo, TaskStatus, TokioSpawner};
pub use provider::{Provider, ProviderError, ProviderTurn, StreamEvent};
pub use tools::{Tool, ToolContext, ToolResult, DEFAULT_MAX_TOOL_OUTPUT_CHARS};
pub use transcript::{EntryKind, ToolCall, ToolOutcome, Transcript, TranscriptEntry};
pub use turn::{SignalView, ToolSupervisor, TurnConfig, TurnCoordinator};

//! Provider boundary for the turn engine.
//!
//! The engine consumes an abstract asynchronous sequence of `StreamEvent`s
//! from an external agent collaborator. Network transport, retries, and
//! backoff live behind this trait; the engine only reacts to events,
//! completion, and errors.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::transcript::{ToolCall, ToolOutcome, TranscriptEntry};

/// One unit of the provider's incremental response. A turn's event
/// sequence is finite and non-restartable.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Reasoning text attached to the streaming entry.
    Reasoning { text: String },
    /// Visible content chunk.
    Content { delta: String },
    /// Side-channel token counter update; does not touch the transcript.
    TokenCount { tokens: usize },
    /// A batch of tool invocations to dispatch.
    ToolCalls { calls: Vec<ToolCall> },
    /// A tool result produced provider-side (e.g. server-executed tools).
    ToolResult { outcome: ToolOutcome },
    /// Terminal event for the turn.
    Done,
}

/// Handles for one in-flight provider response.
///
/// `events` yields the response stream; `outcomes` carries locally
/// executed tool results back so the provider can decide the next step.
/// The provider signals completion by emitting [`StreamEvent::Done`] or by
/// closing the event channel.
pub struct ProviderTurn {
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub outcomes: mpsc::UnboundedSender<ToolOutcome>,
}

impl ProviderTurn {
    /// Build a turn pair; the provider keeps the returned sender/receiver.
    pub fn channel() -> (
        Self,
        mpsc::UnboundedSender<StreamEvent>,
        mpsc::UnboundedReceiver<ToolOutcome>,
    ) {
        let (event_tx, events) = mpsc::unbounded_channel();
        let (outcomes, outcome_rx) = mpsc::unbounded_channel();
        (Self { events, outcomes }, event_tx, outcome_rx)
    }
}

/// Failure opening or sustaining a provider stream.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("request timed out: {0}")]
    Timeout(String),
}

/// External agent collaborator that produces the response stream for one
/// turn from the transcript so far.
#[async_trait]
pub trait Provider: Send + Sync {
    async fn begin_turn(
        &self,
        transcript: &[TranscriptEntry],
    ) -> Result<ProviderTurn, ProviderError>;
}

//! Error taxonomy for the turn engine.
//!
//! Turn-level failures are caught at the coordinator boundary and rendered
//! as assistant-authored transcript entries; they never escape to
//! observers. Tool failures are not errors at this level: they travel as
//! failed `ToolOutcome`s and the turn continues.

use thiserror::Error;

use crate::provider::ProviderError;

/// A turn-level failure. Every variant ends the turn and is surfaced as a
/// visible assistant error entry.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The provider stream itself failed.
    #[error("provider transport failed: {0}")]
    Transport(#[from] ProviderError),

    /// No stream activity for the configured inactivity window.
    #[error("stream timed out: no data received for {0} seconds")]
    StreamTimeout(u64),
}

impl EngineError {
    /// Timeout-class failures get remediation hints in their transcript
    /// entry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::StreamTimeout(_) | Self::Transport(ProviderError::Timeout(_))
        )
    }
}

/// Rejection of a submission while a prior turn is still processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("a turn is already processing")]
    Busy,
}

/// Background task registry lookup failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("no background task with id {0}")]
    NotFound(String),
}

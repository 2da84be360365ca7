//! Retry and continue controls.
//!
//! `/retry` rewinds the transcript to the rightmost user entry and
//! resubmits its payload after a short settle delay, restoring the
//! pre-retry transcript if the resubmission is refused. `/continue` is a
//! plain submission of a fixed continuation prompt and shares the whole
//! turn pipeline.

use std::sync::Arc;

use crate::turn::coordinator::TurnCoordinator;

/// Prompt submitted on `/continue` to resume a truncated response.
pub const CONTINUE_PROMPT: &str = "Continue.";

impl TurnCoordinator {
    /// Ask the provider to pick up where the last response stopped.
    pub async fn continue_turn(self: &Arc<Self>) -> Result<(), crate::error::SubmitError> {
        self.submit(CONTINUE_PROMPT).await
    }

    /// Rewind to the rightmost user entry and resubmit it.
    ///
    /// With no user entry in the transcript this is a no-op apart from
    /// clearing the pending input buffer. The resubmission is deferred so
    /// the prior turn's teardown can settle first; if it is refused, the
    /// transcript rolls back to its pre-retry state.
    pub async fn retry(self: &Arc<Self>) {
        if let Some(handle) = self.pending_retry.lock().await.take() {
            handle.abort();
        }
        self.pending_input.write().await.clear();

        let (snapshot, input) = {
            let mut transcript = self.transcript.write().await;
            let Some(idx) = transcript.rightmost_user() else {
                tracing::debug!("retry requested with no user entry; nothing to do");
                return;
            };
            let snapshot = transcript.snapshot();
            let input = snapshot[idx].content.clone();
            transcript.truncate_from(idx);
            (snapshot, input)
        };

        let engine = Arc::clone(self);
        let delay = self.config.retry_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(error) = engine.submit(input).await {
                tracing::warn!(%error, "retry resubmission refused; restoring transcript");
                engine.transcript.write().await.restore(snapshot);
            }
        });
        *self.pending_retry.lock().await = Some(handle);
    }
}

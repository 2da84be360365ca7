//! Cooperative turn cancellation.
//!
//! Abort is a signal, not a teardown: the stream consumer and in-flight
//! tool executions observe the token at their next suspension point,
//! finalize the active entry without discarding partial content, and exit
//! through the coordinator's guaranteed cleanup path. Background tasks
//! already promoted to the registry are never affected.

use tokio_util::sync::CancellationToken;

/// Per-turn cancellation handle.
#[derive(Clone, Default)]
pub struct CancelController {
    token: CancellationToken,
}

impl CancelController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token observed by the stream consumer and dispatched tools.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Signal the turn to stop. Idempotent; a no-op when nothing is
    /// listening.
    pub fn abort(&self) {
        self.token.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.token.is_cancelled()
    }
}

//! Turn context and observer signals.

use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Correlates one submission with its cancellation token, token counter,
/// and elapsed-time baseline. Created at submission, dropped when the turn
/// reaches a terminal state.
pub struct TurnContext {
    pub cancel: CancellationToken,
    pub started_at: Instant,
    pub tokens: usize,
}

impl TurnContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            started_at: Instant::now(),
            tokens: 0,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }
}

/// Engine-side senders for the side-channel signals. The presentation
/// layer never sees this; it subscribes through [`SignalView`].
pub(crate) struct Signals {
    processing: watch::Sender<bool>,
    tokens: watch::Sender<usize>,
    /// Elapsed-time baseline; `None` means reset to zero.
    started: watch::Sender<Option<Instant>>,
}

impl Signals {
    pub(crate) fn new() -> Self {
        Self {
            processing: watch::Sender::new(false),
            tokens: watch::Sender::new(0),
            started: watch::Sender::new(None),
        }
    }

    pub(crate) fn set_processing(&self, on: bool) {
        self.processing.send_replace(on);
    }

    pub(crate) fn set_tokens(&self, tokens: usize) {
        self.tokens.send_replace(tokens);
    }

    pub(crate) fn set_started(&self, at: Option<Instant>) {
        self.started.send_replace(at);
    }

    pub(crate) fn is_processing(&self) -> bool {
        *self.processing.borrow()
    }

    pub(crate) fn view(&self) -> SignalView {
        SignalView {
            processing: self.processing.subscribe(),
            tokens: self.tokens.subscribe(),
            started: self.started.subscribe(),
        }
    }
}

/// Read-only view of the engine's side-channel signals.
#[derive(Clone)]
pub struct SignalView {
    processing: watch::Receiver<bool>,
    tokens: watch::Receiver<usize>,
    started: watch::Receiver<Option<Instant>>,
}

impl SignalView {
    pub fn processing(&self) -> bool {
        *self.processing.borrow()
    }

    pub fn token_count(&self) -> usize {
        *self.tokens.borrow()
    }

    /// Elapsed time since the current turn's baseline; zero when no turn
    /// is active.
    pub fn elapsed(&self) -> Duration {
        self.started
            .borrow()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// Wait until the engine is no longer processing a turn.
    pub async fn wait_idle(&mut self) {
        // A closed sender also means idle: the engine is gone.
        let _ = self.processing.wait_for(|processing| !processing).await;
    }
}

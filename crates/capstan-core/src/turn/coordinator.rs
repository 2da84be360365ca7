//! Turn coordination - the per-submission orchestration path.
//!
//! `TurnCoordinator` owns the transcript and the side-channel signals,
//! opens a `TurnContext` per submission, hands the provider stream to the
//! multiplexer, and guarantees a single cleanup path on every exit route:
//! processing goes false and the elapsed-time baseline resets, whether the
//! turn completed, errored, or was aborted. Turn-level failures are
//! converted into visible assistant entries; nothing escapes to observers.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::error::{EngineError, SubmitError};
use crate::process::BackgroundRegistry;
use crate::provider::Provider;
use crate::transcript::{Transcript, TranscriptEntry};
use crate::turn::cancel::CancelController;
use crate::turn::context::{SignalView, Signals, TurnContext};
use crate::turn::multiplexer::{self, StreamEnd};
use crate::turn::supervisor::ToolSupervisor;

const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(200);

pub(crate) const TIMEOUT_REMEDIATION: &str = "The stream timed out before completing. \
     Use /continue to resume the response, or /retry to resend your last message.";

/// Engine configuration. All process-wide state is injected through the
/// constructor; there are no ambient statics.
pub struct TurnConfig {
    /// Inactivity window before an in-flight stream is abandoned.
    pub stream_timeout: Duration,
    /// Settle delay before a `/retry` resubmission fires.
    pub retry_delay: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

pub(crate) struct ActiveTurn {
    pub(crate) cancel: CancelController,
    pub(crate) handle: JoinHandle<()>,
}

/// Top-level orchestrator composing the multiplexer, supervisor,
/// cancellation, and retry paths for one submission at a time.
pub struct TurnCoordinator {
    provider: Arc<dyn Provider>,
    supervisor: Arc<ToolSupervisor>,
    background: Arc<BackgroundRegistry>,
    pub(crate) config: TurnConfig,
    pub(crate) transcript: Arc<RwLock<Transcript>>,
    pub(crate) signals: Arc<Signals>,
    current: Mutex<Option<ActiveTurn>>,
    pub(crate) pending_input: RwLock<String>,
    pub(crate) pending_retry: Mutex<Option<JoinHandle<()>>>,
}

impl TurnCoordinator {
    pub fn new(
        provider: Arc<dyn Provider>,
        supervisor: ToolSupervisor,
        background: Arc<BackgroundRegistry>,
        config: TurnConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider,
            supervisor: Arc::new(supervisor),
            background,
            config,
            transcript: Arc::new(RwLock::new(Transcript::new())),
            signals: Arc::new(Signals::new()),
            current: Mutex::new(None),
            pending_input: RwLock::new(String::new()),
            pending_retry: Mutex::new(None),
        })
    }

    /// Submit one fully resolved message payload as a new turn.
    ///
    /// Rejects with [`SubmitError::Busy`] while a prior turn is still
    /// processing; submitting concurrently is an explicit caller decision,
    /// not an engine default.
    pub async fn submit(self: &Arc<Self>, input: impl Into<String>) -> Result<(), SubmitError> {
        let input = input.into();
        let mut current = self.current.lock().await;
        if self.signals.is_processing() {
            return Err(SubmitError::Busy);
        }

        self.pending_input.write().await.clear();
        self.transcript.write().await.push_user(input);

        let cancel = CancelController::new();
        let ctx = TurnContext::new(cancel.token());
        self.signals.set_processing(true);
        self.signals.set_started(Some(ctx.started_at));

        let engine = Arc::clone(self);
        let handle = tokio::spawn(engine.run_turn(ctx));
        *current = Some(ActiveTurn { cancel, handle });
        Ok(())
    }

    /// Signal the in-flight turn to stop. Idempotent; safe with nothing
    /// active. Background tasks are never touched.
    pub async fn abort(&self) {
        if let Some(turn) = self.current.lock().await.as_ref() {
            turn.cancel.abort();
        }
    }

    /// Abort the current turn, wait for it to wind down, and cancel any
    /// pending deferred retry so it cannot act on stale state.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.pending_retry.lock().await.take() {
            handle.abort();
        }
        let turn = self.current.lock().await.take();
        if let Some(turn) = turn {
            turn.cancel.abort();
            let _ = turn.handle.await;
        }
    }

    // ── Observation ────────────────────────────────────────────────────

    pub fn signals(&self) -> SignalView {
        self.signals.view()
    }

    pub async fn transcript_snapshot(&self) -> Vec<TranscriptEntry> {
        self.transcript.read().await.snapshot()
    }

    /// Whether an entry is currently streaming.
    pub async fn is_streaming(&self) -> bool {
        self.transcript.read().await.is_streaming()
    }

    /// Wait until no turn is processing.
    pub async fn wait_idle(&self) {
        self.signals.view().wait_idle().await;
    }

    pub fn background(&self) -> &Arc<BackgroundRegistry> {
        &self.background
    }

    // ── Pending input buffer ───────────────────────────────────────────

    pub async fn set_pending_input(&self, input: impl Into<String>) {
        *self.pending_input.write().await = input.into();
    }

    pub async fn pending_input(&self) -> String {
        self.pending_input.read().await.clone()
    }

    /// Full transcript clear; driven by an external collaborator.
    pub async fn clear_transcript(&self) {
        self.transcript.write().await.clear();
    }

    // ── Turn execution ─────────────────────────────────────────────────

    async fn run_turn(self: Arc<Self>, mut ctx: TurnContext) {
        let signals = Arc::clone(&self.signals);
        // The single cleanup path: runs on every exit route out of this
        // turn, so neither the processing flag nor the elapsed baseline
        // can leak into the next one.
        let _cleanup = scopeguard::guard((), move |_| {
            signals.set_processing(false);
            signals.set_started(None);
        });

        let snapshot = self.transcript.read().await.snapshot();
        // Abort must be observable while the stream is still being opened,
        // not only once events flow.
        let opened = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => None,
            turn = self.provider.begin_turn(&snapshot) => Some(turn),
        };
        let turn = match opened {
            Some(Ok(turn)) => turn,
            Some(Err(e)) => {
                self.report_turn_error(&EngineError::Transport(e)).await;
                return;
            }
            None => {
                self.transcript.write().await.finalize_active();
                self.signals.set_tokens(0);
                tracing::debug!("turn aborted before the stream opened");
                return;
            }
        };

        let result = multiplexer::run_stream(
            turn,
            &self.transcript,
            &mut ctx,
            &self.signals,
            &self.supervisor,
            self.config.stream_timeout,
        )
        .await;

        match result {
            Ok(StreamEnd::Completed) => {
                tracing::debug!(
                    tokens = ctx.tokens,
                    elapsed_ms = ctx.elapsed_ms(),
                    "turn completed"
                );
            }
            Ok(StreamEnd::Aborted) => {
                // Keep partial content; reset the side channels.
                self.transcript.write().await.finalize_active();
                self.signals.set_tokens(0);
                tracing::debug!("turn aborted");
            }
            Err(error) => self.report_turn_error(&error).await,
        }
    }

    /// Convert a turn-level failure into a visible assistant entry.
    async fn report_turn_error(&self, error: &EngineError) {
        tracing::error!(%error, "turn failed");
        let mut text = format!("Error: {error}");
        if error.is_timeout() {
            text.push_str("\n\n");
            text.push_str(TIMEOUT_REMEDIATION);
        }

        let mut transcript = self.transcript.write().await;
        transcript.finalize_active();
        transcript.push_assistant(text);
    }
}

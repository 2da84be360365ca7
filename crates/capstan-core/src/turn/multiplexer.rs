//! Stream multiplexing for the turn engine.
//!
//! Consumes one provider response stream and applies each event to the
//! transcript atomically, in observation order. Tool batches are handed to
//! the supervisor for concurrent dispatch; their outcomes are folded back
//! through the same application path, so transcript mutation stays
//! serialized while execution is not.

use std::time::Duration;

use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinSet;

use crate::error::EngineError;
use crate::provider::{ProviderTurn, StreamEvent};
use crate::transcript::{ToolCall, ToolOutcome, Transcript};
use crate::turn::context::{Signals, TurnContext};
use crate::turn::supervisor::ToolSupervisor;

/// How one applied event steers the consumer loop.
pub(crate) enum Applied {
    Continue,
    /// A tool_calls batch was attached; dispatch these.
    Dispatch(Vec<ToolCall>),
    /// Done observed; drain in-flight tools, then stop.
    Finished,
}

/// How the stream ended, short of an error.
#[derive(Debug)]
pub(crate) enum StreamEnd {
    Completed,
    Aborted,
}

/// Apply a single event to the transcript. Runs synchronously under the
/// transcript write lock so no event's effect interleaves with another's.
pub(crate) fn apply_event(
    transcript: &mut Transcript,
    ctx: &mut TurnContext,
    signals: &Signals,
    event: StreamEvent,
) -> Applied {
    match event {
        StreamEvent::Reasoning { text } => {
            transcript.append_reasoning(&text);
            Applied::Continue
        }
        StreamEvent::Content { delta } => {
            if !transcript.append_content(&delta) {
                tracing::trace!("dropped empty content chunk before stream start");
            }
            Applied::Continue
        }
        StreamEvent::TokenCount { tokens } => {
            ctx.tokens = tokens;
            signals.set_tokens(tokens);
            Applied::Continue
        }
        StreamEvent::ToolCalls { calls } => {
            transcript.attach_tool_calls(calls.clone());
            Applied::Dispatch(calls)
        }
        StreamEvent::ToolResult { outcome } => {
            transcript.finalize_active();
            let id = outcome.id.clone();
            if !transcript.resolve_tool_result(outcome) {
                // Anomaly, not an error: the transcript stays untouched.
                tracing::warn!(id = %id, "tool result with unknown call id ignored");
            }
            Applied::Continue
        }
        StreamEvent::Done => {
            transcript.finish_streaming(ctx.elapsed_ms());
            Applied::Finished
        }
    }
}

/// Drive one provider stream to its end.
///
/// Suspension points: awaiting the next provider event and awaiting a
/// dispatched tool's completion. The cancellation token is observed at
/// both. Locally executed tool outcomes are forwarded to the provider so
/// it can decide the next step.
pub(crate) async fn run_stream(
    turn: ProviderTurn,
    transcript: &RwLock<Transcript>,
    ctx: &mut TurnContext,
    signals: &Signals,
    supervisor: &ToolSupervisor,
    stream_timeout: Duration,
) -> Result<StreamEnd, EngineError> {
    let ProviderTurn {
        mut events,
        outcomes,
    } = turn;
    let mut in_flight: JoinSet<ToolOutcome> = JoinSet::new();
    let mut done = false;

    while !done || !in_flight.is_empty() {
        let idle = in_flight.is_empty();
        tokio::select! {
            biased;

            _ = ctx.cancel.cancelled() => {
                // Drain rather than drop: each in-flight tool observes the
                // token at its next await and releases what it holds (the
                // shell tool terminates its foreground process). Background
                // tasks are out of reach by design.
                while let Some(joined) = in_flight.join_next().await {
                    let Ok(outcome) = joined else { continue };
                    let _ = outcomes.send(outcome.clone());
                    let mut transcript = transcript.write().await;
                    apply_event(
                        &mut transcript,
                        ctx,
                        signals,
                        StreamEvent::ToolResult { outcome },
                    );
                }
                return Ok(StreamEnd::Aborted);
            }

            Some(joined) = in_flight.join_next(), if !idle => {
                match joined {
                    Ok(outcome) => {
                        let _ = outcomes.send(outcome.clone());
                        let mut transcript = transcript.write().await;
                        apply_event(
                            &mut transcript,
                            ctx,
                            signals,
                            StreamEvent::ToolResult { outcome },
                        );
                    }
                    Err(e) => {
                        tracing::error!("tool task failed to join: {e}");
                    }
                }
            }

            event = next_event(&mut events, stream_timeout, idle), if !done => {
                match event {
                    Err(_) => return Err(EngineError::StreamTimeout(stream_timeout.as_secs())),
                    // Channel closed without Done: treat as completion.
                    Ok(None) => done = true,
                    Ok(Some(event)) => {
                        let applied = {
                            let mut transcript = transcript.write().await;
                            apply_event(&mut transcript, ctx, signals, event)
                        };
                        match applied {
                            Applied::Continue => {}
                            Applied::Dispatch(calls) => {
                                supervisor.dispatch(calls, &mut in_flight, ctx.cancel.clone());
                            }
                            Applied::Finished => done = true,
                        }
                    }
                }
            }
        }
    }

    Ok(StreamEnd::Completed)
}

/// Await the next provider event. The inactivity window only covers
/// waiting on the provider itself; while a tool batch is in flight the
/// provider is legitimately quiet, so the window is disarmed.
async fn next_event(
    events: &mut mpsc::UnboundedReceiver<StreamEvent>,
    window: Duration,
    armed: bool,
) -> Result<Option<StreamEvent>, tokio::time::error::Elapsed> {
    if armed {
        tokio::time::timeout(window, events.recv()).await
    } else {
        Ok(events.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{BackgroundRegistry, ProcessSpawner, SpawnedProcess};
    use crate::tools::{Tool, ToolContext, ToolResult};
    use crate::transcript::EntryKind;
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    struct NoSpawner;

    #[async_trait]
    impl ProcessSpawner for NoSpawner {
        async fn spawn(&self, _command: &str, _dir: &Path) -> anyhow::Result<SpawnedProcess> {
            anyhow::bail!("not used")
        }
        fn terminate(&self, _pid: u32) {}
    }

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        async fn execute(&self, arguments: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            let delay_ms = arguments["delay_ms"].as_u64().unwrap_or(0);
            if delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            ToolResult::success(arguments["msg"].as_str().unwrap_or_default())
        }
    }

    fn fixture() -> (Transcript, TurnContext, Signals) {
        (
            Transcript::new(),
            TurnContext::new(CancellationToken::new()),
            Signals::new(),
        )
    }

    fn call(id: &str, args: serde_json::Value) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: "echo".to_string(),
            arguments: args,
        }
    }

    #[tokio::test]
    async fn content_round_trip() {
        let (mut transcript, mut ctx, signals) = fixture();
        for event in [
            StreamEvent::Content { delta: "a".into() },
            StreamEvent::Content { delta: "b".into() },
            StreamEvent::Done,
        ] {
            apply_event(&mut transcript, &mut ctx, &signals, event);
        }

        assert_eq!(transcript.len(), 1);
        let entry = &transcript.entries()[0];
        assert_eq!(entry.content, "ab");
        assert!(!entry.streaming);
        assert!(entry.duration_ms.is_some());
    }

    #[tokio::test]
    async fn token_count_is_side_channel_only() {
        let (mut transcript, mut ctx, signals) = fixture();
        let view = signals.view();
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::TokenCount { tokens: 321 },
        );
        assert!(transcript.is_empty());
        assert_eq!(ctx.tokens, 321);
        assert_eq!(view.token_count(), 321);
    }

    #[tokio::test]
    async fn tool_call_placeholder_transitions_to_result() {
        let (mut transcript, mut ctx, signals) = fixture();
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::ToolCalls {
                calls: vec![call("1", json!({}))],
            },
        );
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::ToolResult {
                outcome: ToolOutcome::success("1", "ok"),
            },
        );

        let results: Vec<_> = transcript
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::ToolResult)
            .collect();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "ok");
    }

    #[tokio::test]
    async fn unmatched_tool_result_is_a_no_op() {
        let (mut transcript, mut ctx, signals) = fixture();
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::ToolCalls {
                calls: vec![call("1", json!({}))],
            },
        );
        let before = transcript.snapshot();

        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::ToolResult {
                outcome: ToolOutcome::success("ghost", "ok"),
            },
        );
        assert_eq!(transcript.snapshot(), before);
    }

    #[tokio::test]
    async fn empty_chunks_drop_before_start_append_after() {
        let (mut transcript, mut ctx, signals) = fixture();
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::Content { delta: "".into() },
        );
        assert!(transcript.is_empty());

        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::Content { delta: "x".into() },
        );
        apply_event(
            &mut transcript,
            &mut ctx,
            &signals,
            StreamEvent::Content { delta: "".into() },
        );
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.entries()[0].content, "x");
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_order_results_correlate_by_id() {
        let background = Arc::new(BackgroundRegistry::new(Arc::new(NoSpawner)));
        let mut supervisor = ToolSupervisor::new(std::env::temp_dir(), background);
        supervisor.register(Arc::new(EchoTool));

        let (turn, event_tx, mut outcome_rx) = ProviderTurn::channel();
        event_tx
            .send(StreamEvent::ToolCalls {
                calls: vec![
                    call("1", json!({"msg": "slow", "delay_ms": 500})),
                    call("2", json!({"msg": "fast"})),
                ],
            })
            .unwrap();
        event_tx.send(StreamEvent::Done).unwrap();
        drop(event_tx);

        let transcript = RwLock::new(Transcript::new());
        let mut ctx = TurnContext::new(CancellationToken::new());
        let signals = Signals::new();

        let end = run_stream(
            turn,
            &transcript,
            &mut ctx,
            &signals,
            &supervisor,
            Duration::from_secs(120),
        )
        .await
        .unwrap();
        assert!(matches!(end, StreamEnd::Completed));

        // The fast sibling finished first and was forwarded first.
        assert_eq!(outcome_rx.recv().await.unwrap().id, "2");
        assert_eq!(outcome_rx.recv().await.unwrap().id, "1");

        let transcript = transcript.read().await;
        let results: Vec<_> = transcript
            .entries()
            .iter()
            .filter(|e| e.kind == EntryKind::ToolResult)
            .collect();
        assert_eq!(results.len(), 2);
        let by_id = |id: &str| {
            results
                .iter()
                .find(|e| e.tool_outcome.as_ref().unwrap().id == id)
                .unwrap()
                .content
                .clone()
        };
        assert_eq!(by_id("1"), "slow");
        assert_eq!(by_id("2"), "fast");
    }

    #[tokio::test]
    async fn abort_is_observed_at_the_next_suspension_point() {
        let background = Arc::new(BackgroundRegistry::new(Arc::new(NoSpawner)));
        let supervisor = ToolSupervisor::new(std::env::temp_dir(), background);

        let cancel = CancellationToken::new();
        let (turn, event_tx, _outcome_rx) = ProviderTurn::channel();
        event_tx
            .send(StreamEvent::Content {
                delta: "partial".into(),
            })
            .unwrap();

        let transcript = RwLock::new(Transcript::new());
        let mut ctx = TurnContext::new(cancel.clone());
        let signals = Signals::new();

        cancel.cancel();
        let end = run_stream(
            turn,
            &transcript,
            &mut ctx,
            &signals,
            &supervisor,
            Duration::from_secs(120),
        )
        .await
        .unwrap();
        assert!(matches!(end, StreamEnd::Aborted));
    }

    /// Holds a resource until it completes or observes cancellation.
    struct HoldingTool {
        released: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Tool for HoldingTool {
        fn name(&self) -> &str {
            "hold"
        }

        async fn execute(&self, _arguments: serde_json::Value, ctx: &ToolContext) -> ToolResult {
            tokio::select! {
                _ = ctx.cancel.cancelled() => {
                    self.released.fetch_add(1, Ordering::SeqCst);
                    ToolResult::error("Command canceled")
                }
                _ = tokio::time::sleep(Duration::from_secs(600)) => ToolResult::success("done"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn abort_lets_in_flight_tools_release_their_resources() {
        let background = Arc::new(BackgroundRegistry::new(Arc::new(NoSpawner)));
        let mut supervisor = ToolSupervisor::new(std::env::temp_dir(), background);
        let released = Arc::new(AtomicUsize::new(0));
        supervisor.register(Arc::new(HoldingTool {
            released: Arc::clone(&released),
        }));

        let cancel = CancellationToken::new();
        let (turn, event_tx, _outcome_rx) = ProviderTurn::channel();
        event_tx
            .send(StreamEvent::ToolCalls {
                calls: vec![ToolCall {
                    id: "1".to_string(),
                    name: "hold".to_string(),
                    arguments: json!({}),
                }],
            })
            .unwrap();

        let canceler = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceler.cancel();
        });

        let transcript = RwLock::new(Transcript::new());
        let mut ctx = TurnContext::new(cancel);
        let signals = Signals::new();

        let end = run_stream(
            turn,
            &transcript,
            &mut ctx,
            &signals,
            &supervisor,
            Duration::from_secs(120),
        )
        .await
        .unwrap();
        assert!(matches!(end, StreamEnd::Aborted));
        assert_eq!(released.load(Ordering::SeqCst), 1);

        // The placeholder does not dangle as "Executing...".
        let transcript = transcript.read().await;
        let entry = transcript
            .entries()
            .iter()
            .find(|e| e.kind == EntryKind::ToolResult)
            .unwrap();
        assert!(entry.content.contains("canceled"));
    }

    #[tokio::test(start_paused = true)]
    async fn inactivity_window_does_not_cover_tool_waits() {
        let background = Arc::new(BackgroundRegistry::new(Arc::new(NoSpawner)));
        let mut supervisor = ToolSupervisor::new(std::env::temp_dir(), background);
        supervisor.register(Arc::new(EchoTool));

        // The provider stays quiet while a tool far outlives the window,
        // then finishes once the outcome comes back.
        let (turn, event_tx, mut outcome_rx) = ProviderTurn::channel();
        event_tx
            .send(StreamEvent::ToolCalls {
                calls: vec![call("1", json!({"msg": "late", "delay_ms": 300_000}))],
            })
            .unwrap();
        tokio::spawn(async move {
            let _ = outcome_rx.recv().await;
            let _ = event_tx.send(StreamEvent::Done);
        });

        let transcript = RwLock::new(Transcript::new());
        let mut ctx = TurnContext::new(CancellationToken::new());
        let signals = Signals::new();

        let end = run_stream(
            turn,
            &transcript,
            &mut ctx,
            &signals,
            &supervisor,
            Duration::from_secs(120),
        )
        .await
        .unwrap();
        assert!(matches!(end, StreamEnd::Completed));

        let transcript = transcript.read().await;
        let result = transcript
            .entries()
            .iter()
            .find(|e| e.kind == EntryKind::ToolResult)
            .unwrap();
        assert_eq!(result.content, "late");
    }

    #[tokio::test(start_paused = true)]
    async fn silence_past_the_window_is_a_timeout() {
        let background = Arc::new(BackgroundRegistry::new(Arc::new(NoSpawner)));
        let supervisor = ToolSupervisor::new(std::env::temp_dir(), background);

        let (turn, _event_tx, _outcome_rx) = ProviderTurn::channel();
        let transcript = RwLock::new(Transcript::new());
        let mut ctx = TurnContext::new(CancellationToken::new());
        let signals = Signals::new();

        let err = run_stream(
            turn,
            &transcript,
            &mut ctx,
            &signals,
            &supervisor,
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(err.is_timeout());
    }
}

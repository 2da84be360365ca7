//! The turn-execution engine.
//!
//! ## Coordinator
//! - `TurnCoordinator` - per-submission orchestration: user entry, turn
//!   context, stream consumption, guaranteed cleanup
//! - `TurnConfig` - explicit constructor-injected configuration
//!
//! ## Stream handling
//! - `multiplexer` - applies provider events to the transcript atomically,
//!   in observation order
//! - `ToolSupervisor` - concurrent tool dispatch, results correlated by id
//!
//! ## Control
//! - `CancelController` - cooperative, idempotent abort
//! - retry/continue - transcript truncation with snapshot rollback, fixed
//!   continuation prompt
//!
//! ## Observation
//! - `SignalView` - processing flag, token count, elapsed time as watch
//!   channels; the transcript itself is read via snapshots

pub mod cancel;
pub mod context;
pub mod coordinator;
pub mod multiplexer;
pub mod retry;
pub mod supervisor;

pub use cancel::CancelController;
pub use context::{SignalView, TurnContext};
pub use coordinator::{TurnConfig, TurnCoordinator};
pub use supervisor::ToolSupervisor;

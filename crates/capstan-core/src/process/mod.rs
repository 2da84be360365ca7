//! Process execution and background task tracking.
//!
//! `ProcessSpawner` is the external collaborator that owns spawning
//! mechanics; `BackgroundRegistry` owns only the bookkeeping: ids, status,
//! and buffered output for tasks promoted out of the synchronous turn
//! path.

pub mod registry;
pub mod spawn;

pub use registry::{BackgroundRegistry, TaskId, TaskInfo, TaskStatus};
pub use spawn::{ExitStatus, ProcessSpawner, SpawnedProcess, TokioSpawner};

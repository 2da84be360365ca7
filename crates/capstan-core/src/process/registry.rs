//! Background task registry.
//!
//! Tracks shell work promoted out of the synchronous turn path. A task's
//! lifecycle is independent of the turn that created it: output
//! accumulation runs in its own collector task, and aborting a turn never
//! reaches in here.
//!
//! State machine per task: `Running -> Completed` or `Running -> Killed`;
//! both terminal states retain the buffered output for later retrieval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{Mutex, RwLock};

use crate::error::RegistryError;
use crate::process::spawn::{ExitStatus, ProcessSpawner, SpawnedProcess};

pub type TaskId = String;

/// Status of a tracked background task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Running,
    Completed { exit_code: i32, duration_ms: u64 },
    Killed { duration_ms: u64 },
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Running)
    }
}

/// Snapshot of one tracked task.
#[derive(Debug, Clone)]
pub struct TaskInfo {
    pub id: TaskId,
    pub command: String,
    pub description: Option<String>,
    pub pid: Option<u32>,
    pub started_at: Instant,
    pub status: TaskStatus,
}

impl TaskInfo {
    pub fn is_running(&self) -> bool {
        self.status == TaskStatus::Running
    }

    pub fn duration(&self) -> std::time::Duration {
        match &self.status {
            TaskStatus::Running => self.started_at.elapsed(),
            TaskStatus::Completed { duration_ms, .. } | TaskStatus::Killed { duration_ms } => {
                std::time::Duration::from_millis(*duration_ms)
            }
        }
    }
}

struct TaskEntry {
    info: TaskInfo,
    output: Arc<Mutex<String>>,
}

/// Process-wide registry of background tasks. Reads stay safe while a
/// collector task is appending output: the map lock only guards metadata,
/// each task buffers output behind its own lock.
#[derive(Clone)]
pub struct BackgroundRegistry {
    tasks: Arc<RwLock<HashMap<TaskId, TaskEntry>>>,
    spawner: Arc<dyn ProcessSpawner>,
}

impl BackgroundRegistry {
    pub fn new(spawner: Arc<dyn ProcessSpawner>) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            spawner,
        }
    }

    /// Promote an already-spawned process to a tracked background task.
    /// Returns immediately with the task id; output collection continues
    /// independently of any turn.
    pub async fn promote(
        &self,
        command: String,
        description: Option<String>,
        spawned: SpawnedProcess,
    ) -> TaskId {
        let id = uuid::Uuid::new_v4().to_string();
        let SpawnedProcess {
            pid,
            mut output,
            exit,
        } = spawned;

        let info = TaskInfo {
            id: id.clone(),
            command: command.clone(),
            description,
            pid,
            started_at: Instant::now(),
            status: TaskStatus::Running,
        };
        let buffer = Arc::new(Mutex::new(String::new()));

        tracing::info!(id = %id, pid = ?pid, command = %command, "background task started");

        let registry = self.clone();
        let task_id = id.clone();
        let collector_buffer = Arc::clone(&buffer);
        tokio::spawn(async move {
            while let Some(chunk) = output.recv().await {
                collector_buffer.lock().await.push_str(&chunk);
            }
            let status = exit.await.unwrap_or(ExitStatus {
                code: None,
                success: false,
            });
            registry.mark_exited(&task_id, status).await;
        });

        let entry = TaskEntry { info, output: buffer };
        self.tasks.write().await.insert(id.clone(), entry);
        id
    }

    /// Snapshot of all tasks with id and status.
    pub async fn list(&self) -> Vec<TaskInfo> {
        self.tasks
            .read()
            .await
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    pub async fn get(&self, id: &str) -> Option<TaskInfo> {
        self.tasks.read().await.get(id).map(|e| e.info.clone())
    }

    /// Buffered output accumulated so far, whatever the task's state.
    pub async fn fetch_output(&self, id: &str) -> Result<String, RegistryError> {
        let buffer = {
            let tasks = self.tasks.read().await;
            let entry = tasks
                .get(id)
                .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
            Arc::clone(&entry.output)
        };
        let output = buffer.lock().await.clone();
        Ok(output)
    }

    /// Kill a running task. Unknown ids return `NotFound`; already-terminal
    /// tasks are a no-op success.
    pub async fn kill(&self, id: &str) -> Result<(), RegistryError> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;

        if entry.info.status.is_terminal() {
            return Ok(());
        }

        if let Some(pid) = entry.info.pid {
            self.spawner.terminate(pid);
        }
        entry.info.status = TaskStatus::Killed {
            duration_ms: entry.info.started_at.elapsed().as_millis() as u64,
        };
        tracing::info!(id = %id, "background task killed");
        Ok(())
    }

    /// Kill every running task (application shutdown).
    pub async fn kill_all(&self) {
        let running: Vec<TaskId> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|e| e.info.is_running())
            .map(|e| e.info.id.clone())
            .collect();

        for id in running {
            let _ = self.kill(&id).await;
        }
    }

    async fn mark_exited(&self, id: &str, status: ExitStatus) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(id) {
            // A kill may have landed first; Killed is terminal and wins.
            if entry.info.status == TaskStatus::Running {
                entry.info.status = TaskStatus::Completed {
                    exit_code: status.code.unwrap_or(-1),
                    duration_ms: entry.info.started_at.elapsed().as_millis() as u64,
                };
                tracing::info!(id = %id, exit_code = ?status.code, "background task completed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::{mpsc, oneshot};

    struct FakeSpawner {
        terminated: AtomicUsize,
    }

    impl FakeSpawner {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                terminated: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait::async_trait]
    impl ProcessSpawner for FakeSpawner {
        async fn spawn(&self, _command: &str, _dir: &Path) -> anyhow::Result<SpawnedProcess> {
            unimplemented!("tests hand-build SpawnedProcess");
        }

        fn terminate(&self, _pid: u32) {
            self.terminated.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn fake_process() -> (
        SpawnedProcess,
        mpsc::UnboundedSender<String>,
        oneshot::Sender<ExitStatus>,
    ) {
        let (out_tx, output) = mpsc::unbounded_channel();
        let (exit_tx, exit) = oneshot::channel();
        (
            SpawnedProcess {
                pid: Some(4242),
                output,
                exit,
            },
            out_tx,
            exit_tx,
        )
    }

    #[tokio::test]
    async fn kill_unknown_id_returns_not_found() {
        let registry = BackgroundRegistry::new(FakeSpawner::new());
        let err = registry.kill("unknown-id").await.unwrap_err();
        assert_eq!(err, RegistryError::NotFound("unknown-id".to_string()));
    }

    #[tokio::test]
    async fn fetch_output_unknown_id_returns_not_found() {
        let registry = BackgroundRegistry::new(FakeSpawner::new());
        assert!(registry.fetch_output("nope").await.is_err());
    }

    #[tokio::test]
    async fn output_readable_while_running() {
        let registry = BackgroundRegistry::new(FakeSpawner::new());
        let (spawned, out_tx, _exit_tx) = fake_process();
        let id = registry
            .promote("sleep 60".to_string(), None, spawned)
            .await;

        out_tx.send("partial line\n".to_string()).unwrap();
        tokio::task::yield_now().await;

        let output = registry.fetch_output(&id).await.unwrap();
        assert_eq!(output, "partial line\n");
        assert!(registry.get(&id).await.unwrap().is_running());
    }

    #[tokio::test]
    async fn completion_retains_output() {
        let registry = BackgroundRegistry::new(FakeSpawner::new());
        let (spawned, out_tx, exit_tx) = fake_process();
        let id = registry.promote("echo hi".to_string(), None, spawned).await;

        out_tx.send("hi\n".to_string()).unwrap();
        drop(out_tx);
        exit_tx
            .send(ExitStatus {
                code: Some(0),
                success: true,
            })
            .unwrap();

        // Collector runs on this runtime; yield until it settles.
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        let info = registry.get(&id).await.unwrap();
        assert!(matches!(
            info.status,
            TaskStatus::Completed { exit_code: 0, .. }
        ));
        assert_eq!(registry.fetch_output(&id).await.unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn kill_is_idempotent_once_terminal() {
        let spawner = FakeSpawner::new();
        let registry = BackgroundRegistry::new(spawner.clone());
        let (spawned, _out_tx, _exit_tx) = fake_process();
        let id = registry
            .promote("sleep 60".to_string(), None, spawned)
            .await;

        registry.kill(&id).await.unwrap();
        assert!(matches!(
            registry.get(&id).await.unwrap().status,
            TaskStatus::Killed { .. }
        ));
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 1);

        // Second kill: no-op success, no second signal.
        registry.kill(&id).await.unwrap();
        assert_eq!(spawner.terminated.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn late_exit_does_not_overwrite_killed() {
        let registry = BackgroundRegistry::new(FakeSpawner::new());
        let (spawned, out_tx, exit_tx) = fake_process();
        let id = registry
            .promote("sleep 60".to_string(), None, spawned)
            .await;

        registry.kill(&id).await.unwrap();

        drop(out_tx);
        exit_tx
            .send(ExitStatus {
                code: Some(143),
                success: false,
            })
            .unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            registry.get(&id).await.unwrap().status,
            TaskStatus::Killed { .. }
        ));
    }
}

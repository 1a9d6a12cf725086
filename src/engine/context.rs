// ABOUTME: Shared run state with a single update path for every task mutation
// ABOUTME: Owns the task list, the artifact list and the stop flag of one run

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, warn};

use super::error::{ExecutionError, Result};
use super::events::{AgentRecord, Artifact, EventSink, LogEntry, LogLevel, RunEvent};
use super::task::{Task, TaskStatus, TaskUpdate};

pub struct RunContext {
    pub run_id: String,
    pub context_prompt: String,
    state: RwLock<RunState>,
    stop_tx: watch::Sender<bool>,
    sink: Arc<dyn EventSink>,
}

#[derive(Debug, Default)]
struct RunState {
    tasks: Vec<Task>,
    artifacts: Vec<Artifact>,
}

impl RunContext {
    /// Build the state for a run, rejecting duplicate ids and self-dependencies
    pub fn new(
        context_prompt: impl Into<String>,
        tasks: Vec<Task>,
        artifacts: Vec<Artifact>,
        sink: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut seen = HashSet::new();
        for task in &tasks {
            if !seen.insert(task.id.clone()) {
                return Err(ExecutionError::DuplicateTask {
                    task_id: task.id.clone(),
                });
            }
            if task.depends_on(&task.id) {
                return Err(ExecutionError::SelfDependency {
                    task_id: task.id.clone(),
                });
            }
        }

        let (stop_tx, _) = watch::channel(false);

        Ok(Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            context_prompt: context_prompt.into(),
            state: RwLock::new(RunState { tasks, artifacts }),
            stop_tx,
            sink,
        })
    }

    pub fn emit(&self, event: RunEvent) {
        self.sink.emit(event);
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.state.read().await.tasks.clone()
    }

    pub async fn task(&self, task_id: &str) -> Option<Task> {
        let state = self.state.read().await;
        state.tasks.iter().find(|t| t.id == task_id).cloned()
    }

    /// Number of delegators above `task_id`; zero for a task nobody delegated
    pub async fn delegation_depth(&self, task_id: &str) -> usize {
        let state = self.state.read().await;
        let mut seen = HashSet::new();
        let mut current = task_id;
        while let Some(parent) = state
            .tasks
            .iter()
            .find(|t| t.id == current)
            .and_then(|t| t.delegator_task_id.as_deref())
        {
            if !seen.insert(parent) {
                break;
            }
            current = parent;
        }
        seen.len()
    }

    pub async fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        let state = self.state.read().await;
        state.tasks.iter().find(|t| t.id == task_id).map(|t| t.status)
    }

    pub async fn artifacts(&self) -> Vec<Artifact> {
        self.state.read().await.artifacts.clone()
    }

    /// Announce the full task list to observers
    pub async fn publish_tasks(&self) {
        let state = self.state.read().await;
        self.sink.emit(RunEvent::TasksReplaced(state.tasks.clone()));
    }

    /// The single mutation path: locate, validate, apply, notify
    pub async fn update_task(&self, task_id: &str, update: TaskUpdate) -> Result<Task> {
        self.update_task_when(task_id, |_| true, update)
            .await?
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })
    }

    /// Apply `update` only if `guard` holds for the current task, atomically.
    /// Returns `Ok(None)` when the guard rejected the update.
    pub async fn update_task_when<F>(
        &self,
        task_id: &str,
        guard: F,
        update: TaskUpdate,
    ) -> Result<Option<Task>>
    where
        F: FnOnce(&Task) -> bool,
    {
        let mut state = self.state.write().await;
        let task = state
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if !guard(task) {
            return Ok(None);
        }

        Self::check_update(task, &update)?;

        let previous = task.status;
        task.apply(update);
        if previous != task.status {
            debug!(
                "Task '{}' ({}): {} -> {}",
                task.title, task.id, previous, task.status
            );
        }

        let snapshot = task.clone();
        self.sink.emit(RunEvent::TaskUpdated(snapshot.clone()));
        Ok(Some(snapshot))
    }

    fn check_update(task: &Task, update: &TaskUpdate) -> Result<()> {
        if task.status.is_terminal() && !update.is_audit_only() {
            let cancel_again =
                task.status == TaskStatus::Cancelled && update.status == Some(TaskStatus::Cancelled);
            if !cancel_again {
                return Err(ExecutionError::TaskFinalized {
                    task_id: task.id.clone(),
                    status: task.status,
                });
            }
        }

        if let Some(next) = update.status {
            if !task.status.can_transition_to(next) {
                return Err(ExecutionError::InvalidTransition {
                    task_id: task.id.clone(),
                    from: task.status,
                    to: next,
                });
            }
        }

        Ok(())
    }

    /// Record a log line on the run, and on the task when one is given
    pub async fn log(&self, task_id: Option<&str>, level: LogLevel, message: impl Into<String>) {
        let message = message.into();

        let entry = {
            let mut state = self.state.write().await;
            match task_id.and_then(|id| state.tasks.iter_mut().find(|t| t.id == id)) {
                Some(task) => {
                    let entry = LogEntry::for_task(task, level, message);
                    task.logs.push(entry.clone());
                    entry
                }
                None => {
                    let mut entry = LogEntry::new(level, message);
                    entry.task_id = task_id.map(str::to_string);
                    entry
                }
            }
        };

        let agent = entry.agent.as_deref().unwrap_or("system");
        match level {
            LogLevel::Info | LogLevel::Success => info!("[{}] {}", agent, entry.message),
            LogLevel::Warn => warn!("[{}] {}", agent, entry.message),
            LogLevel::Error => error!("[{}] {}", agent, entry.message),
        }

        self.sink.emit(RunEvent::Log(entry));
    }

    pub async fn add_artifact(&self, artifact: Artifact) {
        let mut state = self.state.write().await;
        state.artifacts.push(artifact.clone());
        self.sink.emit(RunEvent::ArtifactCreated(artifact));
    }

    /// Pause `parent_id` and enqueue `child` in one step so the child can never
    /// finish before its delegator is marked `Delegating`.
    pub async fn delegate(
        &self,
        parent_id: &str,
        child: Task,
        observation: String,
        record: AgentRecord,
    ) -> Result<Task> {
        let mut state = self.state.write().await;

        if state.tasks.iter().any(|t| t.id == child.id) {
            return Err(ExecutionError::DuplicateTask { task_id: child.id });
        }

        let parent = state
            .tasks
            .iter_mut()
            .find(|t| t.id == parent_id)
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: parent_id.to_string(),
            })?;

        let update = TaskUpdate::observation(observation).with_status(TaskStatus::Delegating);
        Self::check_update(parent, &update)?;
        parent.apply(update);
        let parent_snapshot = parent.clone();

        state.tasks.push(child);

        self.sink.emit(RunEvent::TaskUpdated(parent_snapshot.clone()));
        self.sink.emit(RunEvent::TasksReplaced(state.tasks.clone()));
        self.sink.emit(RunEvent::AgentCreated(record));

        Ok(parent_snapshot)
    }

    /// Raise the stop flag; returns false if it was already raised
    pub fn request_stop(&self) -> bool {
        !self.stop_tx.send_replace(true)
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Resolves once a stop has been requested
    pub async fn stopped(&self) {
        let mut receiver = self.stop_tx.subscribe();
        // The sender lives as long as self, so wait_for only fails on drop
        let _ = receiver.wait_for(|stopped| *stopped).await;
    }

    /// Whether a step executor working on `task_id` may keep going
    pub async fn should_continue(&self, task_id: &str) -> bool {
        !self.is_stopped() && self.status_of(task_id).await == Some(TaskStatus::Executing)
    }
}

impl std::fmt::Debug for RunContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

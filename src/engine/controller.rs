// ABOUTME: Retry and cancellation controller settling the outcome of each executor run
// ABOUTME: Handles retry bookkeeping, cascading cancellation and delegation reactivation

use std::sync::Arc;
use tokio::time::sleep;
use tracing::debug;

use super::context::RunContext;
use super::dependency::DependencyGraph;
use super::error::{ExecutionError, Result};
use super::events::LogLevel;
use super::executor::StepOutcome;
use super::scheduler::RetryPolicy;
use super::task::{Task, TaskStatus, TaskUpdate};

pub struct Controller {
    ctx: Arc<RunContext>,
    retry: RetryPolicy,
}

impl Controller {
    pub fn new(ctx: Arc<RunContext>, retry: RetryPolicy) -> Self {
        Self { ctx, retry }
    }

    /// Apply the result of one executor invocation to the task.
    ///
    /// Every write is guarded on the task still being `Executing`, so results
    /// for a task that was cancelled in the meantime are dropped.
    pub async fn settle(&self, task_id: &str, outcome: Result<StepOutcome>) {
        match outcome {
            Ok(StepOutcome::Completed) => self.complete(task_id).await,
            Ok(StepOutcome::Delegated { child_id }) => {
                debug!("Task {} is waiting on delegated task {}", task_id, child_id);
            }
            Ok(StepOutcome::Aborted) => {
                debug!("Task {} stopped before finishing its loop", task_id);
            }
            Err(err) => self.fail(task_id, err).await,
        }
    }

    async fn complete(&self, task_id: &str) {
        let done = self
            .ctx
            .update_task_when(
                task_id,
                |t| t.status == TaskStatus::Executing,
                TaskUpdate::status(TaskStatus::Done),
            )
            .await;

        match done {
            Ok(Some(task)) => {
                self.ctx
                    .log(
                        Some(task_id),
                        LogLevel::Success,
                        format!("Task '{}' completed by {}", task.title, task.agent.name),
                    )
                    .await;
                self.reactivate_delegator(&task).await;
            }
            Ok(None) => debug!("Discarding completion of task {}: no longer executing", task_id),
            Err(err) => debug!("Discarding completion of task {}: {}", task_id, err),
        }
    }

    async fn fail(&self, task_id: &str, err: ExecutionError) {
        let Some(task) = self.ctx.task(task_id).await else {
            return;
        };
        if task.status != TaskStatus::Executing {
            debug!("Discarding failure of task {} ({}): {}", task_id, task.status, err);
            return;
        }

        let attempt = task.retry_count + 1;
        let attempts_allowed = task.max_retries + 1;

        if err.is_retryable() && task.can_retry() {
            let observed_retries = task.retry_count;
            let requeued = self
                .ctx
                .update_task_when(
                    task_id,
                    |t| t.status == TaskStatus::Executing && t.retry_count == observed_retries,
                    TaskUpdate::status(TaskStatus::Queued).with_retry_count(attempt),
                )
                .await;

            if let Ok(Some(_)) = requeued {
                let delay = self.retry.calculate_delay(task.retry_count);
                self.ctx
                    .log(
                        Some(task_id),
                        LogLevel::Warn,
                        format!(
                            "Task '{}' ({}) failed on attempt {}/{}: {}. Retrying in {:?}",
                            task.title, task.agent.name, attempt, attempts_allowed, err, delay
                        ),
                    )
                    .await;

                tokio::select! {
                    _ = sleep(delay) => {}
                    _ = self.ctx.stopped() => {}
                }
            }
            return;
        }

        let failed = self
            .ctx
            .update_task_when(
                task_id,
                |t| t.status == TaskStatus::Executing,
                TaskUpdate::status(TaskStatus::Error),
            )
            .await;

        if let Ok(Some(task)) = failed {
            self.ctx
                .log(
                    Some(task_id),
                    LogLevel::Error,
                    format!(
                        "Task '{}' ({}) failed after {} attempt(s): {}",
                        task.title, task.agent.name, attempt, err
                    ),
                )
                .await;
            self.fail_delegators(&task).await;
        }
    }

    /// Resume the parent of a finished delegated task
    async fn reactivate_delegator(&self, child: &Task) {
        let Some(parent_id) = child.delegator_task_id.as_deref() else {
            return;
        };

        let resumed = self
            .ctx
            .update_task_when(
                parent_id,
                |p| p.status == TaskStatus::Delegating,
                TaskUpdate::status(TaskStatus::Executing).with_appended_observation(format!(
                    "Delegated task '{}' ({}) completed. Continue with the original task.",
                    child.title, child.id
                )),
            )
            .await;

        match resumed {
            Ok(Some(parent)) => {
                self.ctx
                    .log(
                        Some(parent_id),
                        LogLevel::Info,
                        format!(
                            "Resuming '{}' after delegated task '{}' completed",
                            parent.title, child.title
                        ),
                    )
                    .await;
            }
            Ok(None) => debug!("Delegator {} is no longer delegating", parent_id),
            Err(err) => debug!("Could not resume delegator {}: {}", parent_id, err),
        }
    }

    /// Walk up the delegation chain moving every waiting parent to `Error`
    async fn fail_delegators(&self, child: &Task) {
        let mut current = child.clone();

        while let Some(parent_id) = current.delegator_task_id.clone() {
            let failed = self
                .ctx
                .update_task_when(
                    &parent_id,
                    |p| p.status == TaskStatus::Delegating,
                    TaskUpdate::status(TaskStatus::Error).with_appended_observation(format!(
                        "Delegated task '{}' ended as {}.",
                        current.title, current.status
                    )),
                )
                .await;

            let Ok(Some(parent)) = failed else {
                break;
            };

            self.ctx
                .log(
                    Some(&parent_id),
                    LogLevel::Error,
                    format!(
                        "Task '{}' failed: delegated task '{}' ended as {}",
                        parent.title, current.title, current.status
                    ),
                )
                .await;
            current = parent;
        }
    }

    /// Cancel a task and every task that transitively depends on it.
    ///
    /// Tasks already in a terminal state are left alone but still traversed.
    /// Returns the ids that were cancelled by this call; a repeated call
    /// returns an empty list.
    pub async fn cancel_task(&self, task_id: &str) -> Result<Vec<String>> {
        let tasks = self.ctx.tasks().await;
        if !tasks.iter().any(|t| t.id == task_id) {
            return Err(ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            });
        }

        let graph = DependencyGraph::from_tasks(&tasks);
        let mut targets = vec![task_id.to_string()];
        targets.extend(graph.transitive_dependents(task_id));

        let mut cancelled = Vec::new();
        for id in targets {
            let update = self
                .ctx
                .update_task_when(
                    &id,
                    |t| !t.status.is_terminal(),
                    TaskUpdate::status(TaskStatus::Cancelled),
                )
                .await?;

            if let Some(task) = update {
                let message = if id == task_id {
                    format!("Task '{}' cancelled", task.title)
                } else {
                    format!("Task '{}' cancelled because it depends on {}", task.title, task_id)
                };
                self.ctx.log(Some(&id), LogLevel::Warn, message).await;
                self.fail_delegators(&task).await;
                cancelled.push(id);
            }
        }

        Ok(cancelled)
    }

    /// Cancel everything that has not finished yet, used when the run stops
    pub async fn cancel_all_active(&self) -> Vec<String> {
        let mut cancelled = Vec::new();

        for task in self.ctx.tasks().await {
            if !task.status.is_cancellable() {
                continue;
            }
            let update = self
                .ctx
                .update_task_when(
                    &task.id,
                    |t| t.status.is_cancellable(),
                    TaskUpdate::status(TaskStatus::Cancelled),
                )
                .await;
            if let Ok(Some(_)) = update {
                cancelled.push(task.id);
            }
        }

        if !cancelled.is_empty() {
            self.ctx
                .log(
                    None,
                    LogLevel::Warn,
                    format!("Run stopped; cancelled {} unfinished task(s)", cancelled.len()),
                )
                .await;
        }

        cancelled
    }
}

// ABOUTME: Concurrency scheduler admitting ready tasks up to a fixed cap
// ABOUTME: Races in-flight executors, detects stalls and drains work when a run is stopped

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use super::context::RunContext;
use super::controller::Controller;
use super::dependency::{analyze_stall, ready_tasks, resumable_tasks, StallReport};
use super::error::ExecutionError;
use super::events::LogLevel;
use super::executor::StepExecutor;
use super::task::{TaskStatus, TaskUpdate};

/// Retry budget and backoff between attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
    pub backoff_multiplier: f64,
    #[serde(with = "humantime_serde")]
    pub max_delay: Duration,
}

/// Why the scheduling loop ended
#[derive(Debug, Clone, PartialEq)]
pub enum LoopExit {
    /// No task is active any more
    Drained,
    /// Remaining tasks could never become ready and were forced to `Error`
    Stalled(StallReport),
    /// A stop was requested; unfinished tasks were cancelled
    Stopped,
}

pub struct Scheduler {
    ctx: Arc<RunContext>,
    executor: Arc<StepExecutor>,
    controller: Arc<Controller>,
    max_concurrent: usize,
}

impl Scheduler {
    pub fn new(
        ctx: Arc<RunContext>,
        executor: Arc<StepExecutor>,
        controller: Arc<Controller>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            ctx,
            executor,
            controller,
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Drive the run until it drains, stalls or is stopped
    pub async fn run(&self) -> LoopExit {
        let mut join_set: JoinSet<()> = JoinSet::new();
        let mut in_flight: HashMap<Id, String> = HashMap::new();

        let exit = loop {
            if self.ctx.is_stopped() {
                break LoopExit::Stopped;
            }

            let tasks = self.ctx.tasks().await;
            if join_set.is_empty() && !tasks.iter().any(|t| t.status.is_active()) {
                break LoopExit::Drained;
            }

            let running: HashSet<String> = in_flight.values().cloned().collect();
            let resumed = resumable_tasks(&tasks, &running)
                .into_iter()
                .map(|t| (t.id.clone(), false));
            let fresh = ready_tasks(&tasks, &running)
                .into_iter()
                .map(|t| (t.id.clone(), true));

            for (task_id, is_fresh) in resumed.chain(fresh) {
                if join_set.len() >= self.max_concurrent {
                    break;
                }
                if is_fresh && !self.admit(&task_id).await {
                    continue;
                }

                let executor = Arc::clone(&self.executor);
                let controller = Arc::clone(&self.controller);
                let id = task_id.clone();
                let handle = join_set.spawn(async move {
                    let outcome = executor.execute(&id).await;
                    controller.settle(&id, outcome).await;
                });
                in_flight.insert(handle.id(), task_id);
            }

            if !join_set.is_empty() {
                tokio::select! {
                    joined = join_set.join_next_with_id() => {
                        if let Some(joined) = joined {
                            self.reap(joined, &mut in_flight).await;
                        }
                    }
                    _ = self.ctx.stopped() => {}
                }
                continue;
            }

            let tasks = self.ctx.tasks().await;
            let stranded = tasks
                .iter()
                .any(|t| matches!(t.status, TaskStatus::Queued | TaskStatus::Delegating));
            if stranded {
                break LoopExit::Stalled(self.fail_stranded().await);
            }

            break LoopExit::Drained;
        };

        if exit == LoopExit::Stopped {
            let cancelled = self.controller.cancel_all_active().await;
            info!(
                "Stop requested: cancelled {} task(s), waiting for {} in-flight executor(s)",
                cancelled.len(),
                join_set.len()
            );
            while let Some(joined) = join_set.join_next_with_id().await {
                self.reap(joined, &mut in_flight).await;
            }
        }

        exit
    }

    /// Move a ready task to `Executing`; false if it changed under us
    async fn admit(&self, task_id: &str) -> bool {
        let started = self
            .ctx
            .update_task_when(
                task_id,
                |t| t.status == TaskStatus::Queued,
                TaskUpdate::status(TaskStatus::Executing),
            )
            .await;

        match started {
            Ok(Some(task)) => {
                let attempt = if task.retry_count > 0 {
                    format!(" (retry {}/{})", task.retry_count, task.max_retries)
                } else {
                    String::new()
                };
                self.ctx
                    .log(
                        Some(task_id),
                        LogLevel::Info,
                        format!("Starting '{}'{}", task.title, attempt),
                    )
                    .await;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!("Could not admit task {}: {}", task_id, err);
                false
            }
        }
    }

    async fn reap(
        &self,
        joined: std::result::Result<(Id, ()), JoinError>,
        in_flight: &mut HashMap<Id, String>,
    ) {
        match joined {
            Ok((id, ())) => {
                if let Some(task_id) = in_flight.remove(&id) {
                    debug!("Executor for task {} settled", task_id);
                }
            }
            Err(join_error) => {
                let Some(task_id) = in_flight.remove(&join_error.id()) else {
                    error!("Executor for an unknown task failed: {}", join_error);
                    return;
                };
                error!("Executor for task {} crashed: {}", task_id, join_error);
                self.controller
                    .settle(&task_id, Err(ExecutionError::JoinError(join_error)))
                    .await;
            }
        }
    }

    async fn fail_stranded(&self) -> StallReport {
        let report = analyze_stall(&self.ctx.tasks().await);
        warn!("{}", report);

        for stranded in &report.stranded {
            let failed = self
                .ctx
                .update_task_when(
                    &stranded.task_id,
                    |t| matches!(t.status, TaskStatus::Queued | TaskStatus::Delegating),
                    TaskUpdate::status(TaskStatus::Error),
                )
                .await;

            if let Ok(Some(_)) = failed {
                self.ctx
                    .log(
                        Some(&stranded.task_id),
                        LogLevel::Error,
                        format!(
                            "Task '{}' can never run: {}",
                            stranded.title, stranded.reason
                        ),
                    )
                    .await;
            }
        }

        report
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a specific retry attempt (0-indexed)
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(0.0).powi(exponent);

        let nanos = (self.initial_delay.as_nanos() as f64 * factor).round();

        // Non-finite or overflowing delays clamp to the ceiling
        if nanos.is_finite() && nanos < self.max_delay.as_nanos() as f64 {
            Duration::from_nanos(nanos as u64)
        } else {
            self.max_delay
        }
    }

    pub fn fixed_delay(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            backoff_multiplier: 1.0,
            max_delay: delay,
        }
    }
}

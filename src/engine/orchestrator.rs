// ABOUTME: Entry point wiring the run context, executor, controller and scheduler together
// ABOUTME: Exposes run, stop and cancel-task to callers and classifies the final outcome

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

use super::context::RunContext;
use super::controller::Controller;
use super::error::Result;
use super::events::{Artifact, EventSink, LogLevel, RunEvent, TracingSink};
use super::executor::StepExecutor;
use super::oracle::{ReasoningOracle, ToolSurface};
use super::result::{RunResult, RunStatus};
use super::scheduler::{LoopExit, RetryPolicy, Scheduler};
use super::task::{ReviewEntry, Task, TaskUpdate};

/// Everything the engine needs to know about its environment, fixed for a run
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_concurrent_tasks: usize,
    pub max_steps: usize,
    /// How many levels of delegated children a task may sit under before
    /// further delegation is refused
    pub max_delegation_depth: usize,
    pub retry: RetryPolicy,
    pub simulated_task_delay: Duration,
    pub connected_services: Vec<String>,
    pub preferences: HashMap<String, String>,
}

pub struct Orchestrator {
    settings: Arc<EngineSettings>,
    oracle: Arc<dyn ReasoningOracle>,
    tools: Arc<dyn ToolSurface>,
    sink: Arc<dyn EventSink>,
}

/// A prepared run whose tasks have been validated but not started
pub struct Run {
    ctx: Arc<RunContext>,
    controller: Arc<Controller>,
}

/// Handle for stopping a run or cancelling one of its tasks from elsewhere
#[derive(Clone)]
pub struct RunControl {
    ctx: Arc<RunContext>,
    controller: Arc<Controller>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            max_steps: 10,
            max_delegation_depth: 3,
            retry: RetryPolicy::default(),
            simulated_task_delay: Duration::from_millis(500),
            connected_services: Vec::new(),
            preferences: HashMap::new(),
        }
    }
}

impl Orchestrator {
    pub fn new(
        settings: EngineSettings,
        oracle: Arc<dyn ReasoningOracle>,
        tools: Arc<dyn ToolSurface>,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            oracle,
            tools,
            sink: Arc::new(TracingSink),
        }
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Validate the initial task set and build the run state
    pub fn prepare(
        &self,
        tasks: Vec<Task>,
        context_prompt: impl Into<String>,
        artifacts: Vec<Artifact>,
    ) -> Result<Run> {
        let ctx = Arc::new(RunContext::new(
            context_prompt,
            tasks,
            artifacts,
            Arc::clone(&self.sink),
        )?);
        let controller = Arc::new(Controller::new(
            Arc::clone(&ctx),
            self.settings.retry.clone(),
        ));

        Ok(Run { ctx, controller })
    }

    /// Execute a prepared run to its end state
    #[instrument(skip(self, run), fields(run_id = %run.ctx.run_id))]
    pub async fn execute(&self, run: Run) -> RunResult {
        let Run { ctx, controller } = run;
        let mut result = RunResult::new(ctx.run_id.clone());

        info!(
            "Starting run {} with concurrency cap {}",
            ctx.run_id, self.settings.max_concurrent_tasks
        );
        ctx.publish_tasks().await;

        let executor = Arc::new(StepExecutor::new(
            Arc::clone(&ctx),
            Arc::clone(&self.oracle),
            Arc::clone(&self.tools),
            Arc::clone(&self.settings),
        ));
        let scheduler = Scheduler::new(
            Arc::clone(&ctx),
            executor,
            controller,
            self.settings.max_concurrent_tasks,
        );

        let exit = scheduler.run().await;
        result.finish(ctx.tasks().await, ctx.artifacts().await);

        match exit {
            LoopExit::Stopped => result.mark_stopped(),
            LoopExit::Stalled(report) => result.mark_stalled(report),
            LoopExit::Drained => result.classify(),
        }

        match result.status {
            RunStatus::Success | RunStatus::Stopped => {
                ctx.log(None, LogLevel::Success, format!("Run finished: {}", result.status))
                    .await;
                ctx.emit(RunEvent::RunFinished);
            }
            _ => {
                let reason = result
                    .reason
                    .clone()
                    .unwrap_or_else(|| result.status.to_string());
                ctx.log(None, LogLevel::Error, format!("Run failed: {}", reason))
                    .await;
                ctx.emit(RunEvent::RunFailed { reason });
            }
        }

        info!(
            "Run {} completed in {:?} with status: {}",
            result.run_id,
            result.duration.unwrap_or_default(),
            result.status
        );

        result
    }

    /// Prepare and execute in one go
    pub async fn run(
        &self,
        tasks: Vec<Task>,
        context_prompt: impl Into<String>,
        artifacts: Vec<Artifact>,
    ) -> Result<RunResult> {
        let run = self.prepare(tasks, context_prompt, artifacts)?;
        Ok(self.execute(run).await)
    }
}

impl Run {
    pub fn id(&self) -> &str {
        &self.ctx.run_id
    }

    pub fn control(&self) -> RunControl {
        RunControl {
            ctx: Arc::clone(&self.ctx),
            controller: Arc::clone(&self.controller),
        }
    }
}

impl RunControl {
    /// Request a stop; returns false if one was already requested
    pub fn stop(&self) -> bool {
        let first = self.ctx.request_stop();
        if first {
            info!("Stop requested for run {}", self.ctx.run_id);
        }
        first
    }

    /// Cancel a task and its transitive dependents, returning the ids cancelled
    pub async fn cancel_task(&self, task_id: &str) -> Result<Vec<String>> {
        self.controller.cancel_task(task_id).await
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.ctx.tasks().await
    }

    /// Append a reviewer's verdict to a task's review history. Allowed in any
    /// state, including after the task has finished.
    pub async fn record_review(&self, task_id: &str, review: ReviewEntry) -> Result<()> {
        self.ctx
            .update_task(task_id, TaskUpdate::review(review))
            .await
            .map(|_| ())
    }
}

// ABOUTME: Step executor driving one task through its think-act-observe loop
// ABOUTME: Calls the reasoning oracle, dispatches tool calls and handles delegation to new agents

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tokio::time::sleep;
use tracing::{debug, instrument};

use super::context::RunContext;
use super::error::{ExecutionError, Result};
use super::events::{AgentRecord, Artifact, LogLevel};
use super::oracle::{Decision, ReasoningOracle, TaskGoal, ToolCall, ToolSurface};
use super::orchestrator::EngineSettings;
use super::task::{Agent, SubStep, Task, TaskUpdate};

/// How a single executor invocation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The loop concluded, either by a finished reply or by exhausting the step budget
    Completed,
    /// The task handed work to a new child task and is now `Delegating`
    Delegated { child_id: String },
    /// The task stopped being `Executing` or the run was stopped mid-loop
    Aborted,
}

pub struct StepExecutor {
    ctx: Arc<RunContext>,
    oracle: Arc<dyn ReasoningOracle>,
    tools: Arc<dyn ToolSurface>,
    settings: Arc<EngineSettings>,
}

impl StepExecutor {
    pub fn new(
        ctx: Arc<RunContext>,
        oracle: Arc<dyn ReasoningOracle>,
        tools: Arc<dyn ToolSurface>,
        settings: Arc<EngineSettings>,
    ) -> Self {
        Self {
            ctx,
            oracle,
            tools,
            settings,
        }
    }

    #[instrument(skip(self), fields(run_id = %self.ctx.run_id))]
    pub async fn execute(&self, task_id: &str) -> Result<StepOutcome> {
        let task = self
            .ctx
            .task(task_id)
            .await
            .ok_or_else(|| ExecutionError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        if task.agent.uses_reasoning_loop() {
            self.reason(&task).await
        } else {
            self.simulate(&task).await
        }
    }

    async fn simulate(&self, task: &Task) -> Result<StepOutcome> {
        self.ctx
            .log(
                Some(&task.id),
                LogLevel::Info,
                format!("{} ({}) is working on '{}'", task.agent.name, task.agent.role, task.title),
            )
            .await;

        tokio::select! {
            _ = sleep(self.settings.simulated_task_delay) => {}
            _ = self.ctx.stopped() => {}
        }

        if !self.ctx.should_continue(&task.id).await {
            return Ok(StepOutcome::Aborted);
        }

        Ok(StepOutcome::Completed)
    }

    async fn reason(&self, task: &Task) -> Result<StepOutcome> {
        let goal = TaskGoal {
            task_id: task.id.clone(),
            title: task.title.clone(),
            details: task.details.clone(),
            context_prompt: self.ctx.context_prompt.clone(),
            connected_services: self.settings.connected_services.clone(),
            preferences: self.settings.preferences.clone(),
        };

        // The budget spans every invocation of the task, so steps taken before
        // a retry or a delegation still count against it
        loop {
            if !self.ctx.should_continue(&task.id).await {
                return Ok(StepOutcome::Aborted);
            }

            let history = self
                .ctx
                .task(&task.id)
                .await
                .map(|t| t.sub_steps)
                .unwrap_or_default();
            if history.len() >= self.settings.max_steps {
                break;
            }
            let artifacts = self.ctx.artifacts().await;

            debug!(
                "Task {} step {}/{}",
                task.id,
                history.len() + 1,
                self.settings.max_steps
            );
            let reply = self
                .oracle
                .decide(&goal, &history, &artifacts)
                .await
                .map_err(|message| ExecutionError::OracleFailed {
                    task_id: task.id.clone(),
                    message,
                })?;

            // A reply that arrives after cancellation is discarded
            if !self.ctx.should_continue(&task.id).await {
                return Ok(StepOutcome::Aborted);
            }

            match Decision::from_value(&reply) {
                Decision::Finished { final_thought } => {
                    self.ctx
                        .log(
                            Some(&task.id),
                            LogLevel::Success,
                            format!("Finished '{}': {}", task.title, final_thought),
                        )
                        .await;
                    return Ok(StepOutcome::Completed);
                }
                Decision::Act {
                    thought,
                    call,
                    record,
                } => {
                    self.ctx
                        .log(Some(&task.id), LogLevel::Info, format!("Thought: {}", thought))
                        .await;
                    self.ctx
                        .update_task(
                            &task.id,
                            TaskUpdate::sub_step(SubStep {
                                thought,
                                tool_call: Some(record),
                                observation: String::new(),
                            }),
                        )
                        .await?;

                    if let Some(outcome) = self.dispatch(task, call).await? {
                        return Ok(outcome);
                    }
                }
            }
        }

        self.ctx
            .log(
                Some(&task.id),
                LogLevel::Warn,
                format!(
                    "'{}' reached the limit of {} reasoning steps; concluding with the work so far",
                    task.title, self.settings.max_steps
                ),
            )
            .await;

        Ok(StepOutcome::Completed)
    }

    /// Run one tool call. `Some(outcome)` ends the loop early.
    async fn dispatch(&self, task: &Task, call: ToolCall) -> Result<Option<StepOutcome>> {
        if !self.ctx.should_continue(&task.id).await {
            return Ok(Some(StepOutcome::Aborted));
        }

        match call {
            ToolCall::CreateArtifact {
                title,
                kind,
                content,
            } => {
                let artifact = Artifact::new(title.clone(), kind, content).created_by(task.id.clone());
                self.ctx.add_artifact(artifact).await;
                self.observe(task, format!("Artifact '{}' created successfully.", title))
                    .await?;
                Ok(None)
            }
            ToolCall::Delegate {
                title,
                details,
                agent_name,
            } => self.delegate(task, title, details, agent_name).await,
            ToolCall::AskClarification { question } => {
                self.ctx
                    .log(
                        Some(&task.id),
                        LogLevel::Warn,
                        format!("Clarification requested: {}", question),
                    )
                    .await;
                self.observe(
                    task,
                    format!(
                        "Asked for clarification: \"{}\". No answer is available during this run; continue with the most reasonable assumption.",
                        question
                    ),
                )
                .await?;
                Ok(None)
            }
            ToolCall::Invoke { name, args } => {
                self.ctx
                    .log(
                        Some(&task.id),
                        LogLevel::Info,
                        format!("Calling tool {} with {}", name, Value::Object(args.clone())),
                    )
                    .await;

                let result = self.tools.invoke(&name, &args).await;

                // The call itself cannot be interrupted, but its result is
                // dropped if the task was cancelled meanwhile
                if !self.ctx.should_continue(&task.id).await {
                    return Ok(Some(StepOutcome::Aborted));
                }

                match result {
                    Ok(value) => {
                        self.ctx
                            .log(Some(&task.id), LogLevel::Info, format!("Tool {} returned", name))
                            .await;
                        self.observe(task, value.to_string()).await?;
                        Ok(None)
                    }
                    Err(err) => {
                        self.observe(task, format!("Error: {}", err)).await?;
                        Err(err.into())
                    }
                }
            }
        }
    }

    async fn delegate(
        &self,
        task: &Task,
        title: String,
        details: String,
        agent_name: Option<String>,
    ) -> Result<Option<StepOutcome>> {
        let depth = self.ctx.delegation_depth(&task.id).await;
        if depth >= self.settings.max_delegation_depth {
            self.ctx
                .log(
                    Some(&task.id),
                    LogLevel::Warn,
                    format!(
                        "Refused to delegate '{}': already {} levels of delegation deep",
                        title, depth
                    ),
                )
                .await;
            self.observe(
                task,
                format!(
                    "Delegation refused: the limit of {} nested delegations is reached. Do the work directly.",
                    self.settings.max_delegation_depth
                ),
            )
            .await?;
            return Ok(None);
        }

        let child = Task::new(title.clone(), details)
            .with_agent(Agent::reasoning())
            .with_delegator(task.id.clone())
            .with_max_retries(self.settings.retry.max_retries);
        let child_id = child.id.clone();

        let agent_name = agent_name.unwrap_or_else(|| format!("{} Agent", title));
        let record = AgentRecord {
            agent_name: agent_name.clone(),
            agent: child.agent.clone(),
            task_id: child_id.clone(),
            delegator_task_id: task.id.clone(),
            created_at: Utc::now(),
        };

        let observation = format!(
            "Delegated '{}' to new agent {} (task {}); waiting for it to finish.",
            title, agent_name, child_id
        );
        self.ctx.delegate(&task.id, child, observation, record).await?;

        self.ctx
            .log(
                Some(&task.id),
                LogLevel::Info,
                format!("Delegated '{}' to {}", title, agent_name),
            )
            .await;

        Ok(Some(StepOutcome::Delegated { child_id }))
    }

    async fn observe(&self, task: &Task, observation: String) -> Result<()> {
        self.ctx
            .update_task(&task.id, TaskUpdate::observation(observation))
            .await
            .map(|_| ())
    }
}

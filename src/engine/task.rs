// ABOUTME: Task entity, agent assignment and the task state machine
// ABOUTME: Defines the unit of orchestrated work and the partial updates applied to it

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::events::LogEntry;

/// Display name reserved for executor agents that drive the reasoning loop.
pub const REASONING_AGENT_NAME: &str = "Reasoner";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Queued,
    Executing,
    Delegating,
    PendingReview,
    Revising,
    Done,
    Error,
    Cancelled,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    Planner,
    #[default]
    Executor,
    Reviewer,
    Synthesizer,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Agent {
    pub role: AgentRole,
    pub name: String,
}

/// A tool call as recorded on a step, independent of how the engine dispatched it
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCallRecord {
    pub name: String,
    #[serde(default)]
    pub args: Map<String, Value>,
}

/// One think-act-observe iteration of the reasoning loop
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubStep {
    pub thought: String,
    pub tool_call: Option<ToolCallRecord>,
    #[serde(default)]
    pub observation: String,
}

/// One verdict from a reviewer outside the engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewEntry {
    pub reviewer: String,
    pub approved: bool,
    pub feedback: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub title: String,
    pub details: String,
    pub status: TaskStatus,
    pub agent: Agent,
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    #[serde(default)]
    pub retry_count: u32,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub sub_steps: Vec<SubStep>,
    #[serde(default)]
    pub delegator_task_id: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
    #[serde(default)]
    pub review_history: Vec<ReviewEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update applied through the run's single update path
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub status: Option<TaskStatus>,
    pub retry_count: Option<u32>,
    pub push_sub_step: Option<SubStep>,
    pub set_observation: Option<String>,
    pub append_observation: Option<String>,
    pub push_review: Option<ReviewEntry>,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Done | TaskStatus::Error | TaskStatus::Cancelled
        )
    }

    /// States that keep the scheduler loop alive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskStatus::Queued | TaskStatus::Executing | TaskStatus::Delegating
        )
    }

    /// States a stop request moves to `Cancelled`
    pub fn is_cancellable(&self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;

        if *self == next {
            return !self.is_terminal() || next == Cancelled;
        }

        match (self, next) {
            (Queued, Executing) | (Queued, Error) | (Queued, Cancelled) => true,
            (Executing, Done)
            | (Executing, Queued)
            | (Executing, Error)
            | (Executing, Delegating)
            | (Executing, PendingReview)
            | (Executing, Cancelled) => true,
            (Delegating, Executing) | (Delegating, Error) | (Delegating, Cancelled) => true,
            (PendingReview, Revising)
            | (PendingReview, Done)
            | (PendingReview, Error)
            | (PendingReview, Cancelled) => true,
            (Revising, Executing) | (Revising, Queued) | (Revising, Cancelled) => true,
            _ => false,
        }
    }
}

impl Agent {
    pub fn new(role: AgentRole, name: impl Into<String>) -> Self {
        Self {
            role,
            name: name.into(),
        }
    }

    /// The executor agent that runs the full reasoning loop
    pub fn reasoning() -> Self {
        Self::new(AgentRole::Executor, REASONING_AGENT_NAME)
    }

    pub fn uses_reasoning_loop(&self) -> bool {
        self.role == AgentRole::Executor && self.name == REASONING_AGENT_NAME
    }
}

impl Default for Agent {
    fn default() -> Self {
        Self::reasoning()
    }
}

impl Task {
    pub fn new(title: impl Into<String>, details: impl Into<String>) -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string(), title, details)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>, details: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            title: title.into(),
            details: details.into(),
            status: TaskStatus::Queued,
            agent: Agent::default(),
            dependencies: BTreeSet::new(),
            retry_count: 0,
            max_retries: 0,
            sub_steps: Vec::new(),
            delegator_task_id: None,
            logs: Vec::new(),
            review_history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_agent(mut self, agent: Agent) -> Self {
        self.agent = agent;
        self
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_delegator(mut self, delegator_task_id: impl Into<String>) -> Self {
        self.delegator_task_id = Some(delegator_task_id.into());
        self
    }

    pub fn depends_on(&self, task_id: &str) -> bool {
        self.dependencies.contains(task_id)
    }

    pub fn can_retry(&self) -> bool {
        self.retry_count < self.max_retries
    }

    /// Apply a partial update; the caller has already validated the transition
    pub(crate) fn apply(&mut self, update: TaskUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(retry_count) = update.retry_count {
            self.retry_count = retry_count;
        }
        if let Some(step) = update.push_sub_step {
            self.sub_steps.push(step);
        }
        if let Some(observation) = update.set_observation {
            if let Some(last) = self.sub_steps.last_mut() {
                last.observation = observation;
            }
        }
        if let Some(extra) = update.append_observation {
            if let Some(last) = self.sub_steps.last_mut() {
                if last.observation.is_empty() {
                    last.observation = extra;
                } else {
                    last.observation.push('\n');
                    last.observation.push_str(&extra);
                }
            }
        }
        if let Some(review) = update.push_review {
            self.review_history.push(review);
        }
        self.updated_at = Utc::now();
    }
}

impl TaskUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn review(entry: ReviewEntry) -> Self {
        Self {
            push_review: Some(entry),
            ..Default::default()
        }
    }

    pub fn sub_step(step: SubStep) -> Self {
        Self {
            push_sub_step: Some(step),
            ..Default::default()
        }
    }

    pub fn observation(observation: impl Into<String>) -> Self {
        Self {
            set_observation: Some(observation.into()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_appended_observation(mut self, observation: impl Into<String>) -> Self {
        self.append_observation = Some(observation.into());
        self
    }

    /// True when the update only appends to audit trails
    pub fn is_audit_only(&self) -> bool {
        self.status.is_none()
            && self.retry_count.is_none()
            && self.push_sub_step.is_none()
            && self.set_observation.is_none()
            && self.append_observation.is_none()
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Queued => write!(f, "queued"),
            TaskStatus::Executing => write!(f, "executing"),
            TaskStatus::Delegating => write!(f, "delegating"),
            TaskStatus::PendingReview => write!(f, "pending_review"),
            TaskStatus::Revising => write!(f, "revising"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
            TaskStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentRole::Planner => write!(f, "planner"),
            AgentRole::Executor => write!(f, "executor"),
            AgentRole::Reviewer => write!(f, "reviewer"),
            AgentRole::Synthesizer => write!(f, "synthesizer"),
        }
    }
}

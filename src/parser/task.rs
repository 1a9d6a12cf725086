// ABOUTME: Task entries of a playbook and their conversion into engine tasks
// ABOUTME: Defines the agent assignment, dependencies, retry budget and optional oracle script

use serde::{Deserialize, Serialize};

use crate::engine::task::{Agent, AgentRole, Task, REASONING_AGENT_NAME};
use crate::oracle::ScriptedReply;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub title: String,
    #[serde(default)]
    pub details: String,
    #[serde(default)]
    pub agent: AgentSpec,
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Overrides the configured retry budget for this task
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<Vec<ScriptedReply>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentSpec {
    #[serde(default)]
    pub role: AgentRole,
    #[serde(default = "default_agent_name")]
    pub name: String,
}

fn default_agent_name() -> String {
    REASONING_AGENT_NAME.to_string()
}

impl Default for AgentSpec {
    fn default() -> Self {
        Self {
            role: AgentRole::Executor,
            name: default_agent_name(),
        }
    }
}

impl AgentSpec {
    pub fn to_agent(&self) -> Agent {
        Agent::new(self.role, self.name.clone())
    }
}

impl TaskSpec {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            details: String::new(),
            agent: AgentSpec::default(),
            depends_on: Vec::new(),
            max_retries: None,
            script: None,
        }
    }

    /// Build the queued engine task for this entry
    pub fn to_task(&self, id: &str, default_max_retries: u32) -> Task {
        Task::with_id(id, self.title.clone(), self.details.clone())
            .with_agent(self.agent.to_agent())
            .with_dependencies(self.depends_on.iter().cloned())
            .with_max_retries(self.max_retries.unwrap_or(default_max_retries))
    }

    pub fn uses_reasoning_loop(&self) -> bool {
        self.agent.to_agent().uses_reasoning_loop()
    }
}

// ABOUTME: Reasoning oracle that replays pre-written replies per task
// ABOUTME: Drives playbook runs deterministically without a model provider

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio::sync::Mutex;
use tracing::debug;

use crate::engine::events::Artifact;
use crate::engine::oracle::{ReasoningOracle, TaskGoal};
use crate::engine::task::SubStep;

/// One scripted oracle reply: either a reply in the wire shape or a failure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ScriptedReply {
    Failure { error: String },
    Reply(Value),
}

/// Replays scripts keyed by task id or task title, one reply per call
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    scripts: HashMap<String, Vec<ScriptedReply>>,
    cursors: Mutex<HashMap<String, usize>>,
}

impl ScriptedOracle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_script(mut self, key: impl Into<String>, replies: Vec<ScriptedReply>) -> Self {
        self.scripts.insert(key.into(), replies);
        self
    }

    pub fn with_scripts<I>(mut self, scripts: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<ScriptedReply>)>,
    {
        self.scripts.extend(scripts);
        self
    }

    pub fn has_script(&self, key: &str) -> bool {
        self.scripts.contains_key(key)
    }

    fn script_for(&self, goal: &TaskGoal) -> Option<&Vec<ScriptedReply>> {
        self.scripts
            .get(&goal.task_id)
            .or_else(|| self.scripts.get(&goal.title))
    }
}

#[async_trait]
impl ReasoningOracle for ScriptedOracle {
    async fn decide(
        &self,
        goal: &TaskGoal,
        _history: &[SubStep],
        _artifacts: &[Artifact],
    ) -> std::result::Result<Value, String> {
        let position = {
            let mut cursors = self.cursors.lock().await;
            let cursor = cursors.entry(goal.task_id.clone()).or_insert(0);
            let position = *cursor;
            *cursor += 1;
            position
        };

        match self.script_for(goal).and_then(|script| script.get(position)) {
            Some(ScriptedReply::Reply(reply)) => {
                debug!("Scripted reply {} for task {}", position + 1, goal.task_id);
                Ok(reply.clone())
            }
            Some(ScriptedReply::Failure { error }) => Err(error.clone()),
            None => Ok(json!({
                "finished": true,
                "finalThought": format!("Script for '{}' is complete.", goal.title),
            })),
        }
    }
}

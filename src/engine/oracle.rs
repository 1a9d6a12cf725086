// ABOUTME: Contracts for the reasoning oracle and the tool invocation surface
// ABOUTME: Parses oracle replies into typed decisions and tool calls, degrading malformed output

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

use super::error::ToolError;
use super::events::{Artifact, ArtifactKind};
use super::task::{SubStep, ToolCallRecord};

pub const CREATE_ARTIFACT: &str = "createArtifact";
pub const DELEGATE_TASK: &str = "create_and_delegate_task_to_new_agent";
pub const ASK_CLARIFICATION: &str = "ask_user_for_clarification";

/// What the oracle is asked to reason about for one task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskGoal {
    pub task_id: String,
    pub title: String,
    pub details: String,
    pub context_prompt: String,
    #[serde(default)]
    pub connected_services: Vec<String>,
    #[serde(default)]
    pub preferences: HashMap<String, String>,
}

/// Decides the next step of a task's reasoning loop.
///
/// Implementations return the raw reply in the wire shape
/// `{finished: true, finalThought}` or `{thought, toolCall: {name, args}}`;
/// the engine interprets it with [`Decision::from_value`]. An `Err` is an
/// oracle failure and sends the task down the retry path.
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    async fn decide(
        &self,
        goal: &TaskGoal,
        history: &[SubStep],
        artifacts: &[Artifact],
    ) -> std::result::Result<Value, String>;
}

/// Side-effecting tools the engine does not handle itself
#[async_trait]
pub trait ToolSurface: Send + Sync {
    async fn invoke(
        &self,
        name: &str,
        args: &Map<String, Value>,
    ) -> std::result::Result<Value, ToolError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolCall {
    CreateArtifact {
        title: String,
        kind: ArtifactKind,
        content: String,
    },
    Delegate {
        title: String,
        details: String,
        agent_name: Option<String>,
    },
    AskClarification {
        question: String,
    },
    Invoke {
        name: String,
        args: Map<String, Value>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Finished {
        final_thought: String,
    },
    Act {
        thought: String,
        call: ToolCall,
        record: ToolCallRecord,
    },
}

impl ToolCall {
    pub fn parse(name: &str, args: &Map<String, Value>) -> std::result::Result<Self, String> {
        match name {
            CREATE_ARTIFACT => Ok(ToolCall::CreateArtifact {
                title: required_str(args, name, &["title"])?,
                kind: optional_str(args, &["type", "kind"])
                    .map(|kind| ArtifactKind::parse(&kind))
                    .unwrap_or(ArtifactKind::Markdown),
                content: required_str(args, name, &["content"])?,
            }),
            DELEGATE_TASK => Ok(ToolCall::Delegate {
                title: required_str(args, name, &["title", "task"])?,
                details: optional_str(args, &["details", "description"]).unwrap_or_default(),
                agent_name: optional_str(args, &["agentName", "agent_name"]),
            }),
            ASK_CLARIFICATION => Ok(ToolCall::AskClarification {
                question: required_str(args, name, &["question"])?,
            }),
            "" => Err("tool call has no name".to_string()),
            other => Ok(ToolCall::Invoke {
                name: other.to_string(),
                args: args.clone(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ToolCall::CreateArtifact { .. } => CREATE_ARTIFACT,
            ToolCall::Delegate { .. } => DELEGATE_TASK,
            ToolCall::AskClarification { .. } => ASK_CLARIFICATION,
            ToolCall::Invoke { name, .. } => name,
        }
    }

    fn clarification(question: String) -> Self {
        ToolCall::AskClarification { question }
    }
}

impl Decision {
    /// Interpret a raw oracle reply. Never fails: anything that does not match
    /// the wire shape becomes a request for clarification.
    pub fn from_value(value: &Value) -> Self {
        match Self::parse(value) {
            Ok(decision) => decision,
            Err(problem) => Self::fallback(problem),
        }
    }

    fn parse(value: &Value) -> std::result::Result<Self, String> {
        let object = value
            .as_object()
            .ok_or_else(|| format!("expected an object, got {}", type_name(value)))?;

        if object.get("finished").and_then(Value::as_bool) == Some(true) {
            let final_thought = object
                .get("finalThought")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Ok(Decision::Finished { final_thought });
        }

        let thought = object
            .get("thought")
            .and_then(Value::as_str)
            .ok_or("missing 'thought'")?
            .to_string();

        let tool_call = object
            .get("toolCall")
            .and_then(Value::as_object)
            .ok_or("missing 'toolCall'")?;

        let name = tool_call
            .get("name")
            .and_then(Value::as_str)
            .ok_or("tool call has no name")?;

        let args = match tool_call.get("args") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args.clone(),
            Some(other) => return Err(format!("tool call args must be an object, got {}", type_name(other))),
        };

        let call = ToolCall::parse(name, &args)?;

        Ok(Decision::Act {
            thought,
            call,
            record: ToolCallRecord {
                name: name.to_string(),
                args,
            },
        })
    }

    fn fallback(problem: String) -> Self {
        let question = format!(
            "I could not interpret my previous reasoning step ({}). Could you clarify how to proceed?",
            problem
        );
        let mut args = Map::new();
        args.insert("question".to_string(), Value::String(question.clone()));

        Decision::Act {
            thought: "The reasoning reply was malformed; asking for clarification instead.".to_string(),
            call: ToolCall::clarification(question),
            record: ToolCallRecord {
                name: ASK_CLARIFICATION.to_string(),
                args,
            },
        }
    }
}

fn required_str(
    args: &Map<String, Value>,
    tool: &str,
    keys: &[&str],
) -> std::result::Result<String, String> {
    optional_str(args, keys)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| format!("{} requires '{}'", tool, keys[0]))
}

fn optional_str(args: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| args.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_finished_reply() {
        let decision = Decision::from_value(&json!({"finished": true, "finalThought": "All done"}));
        assert_eq!(
            decision,
            Decision::Finished {
                final_thought: "All done".to_string()
            }
        );
    }

    #[test]
    fn test_special_tool_calls() {
        let decision = Decision::from_value(&json!({
            "thought": "Save the draft",
            "toolCall": {"name": "createArtifact", "args": {"title": "Draft", "type": "code", "content": "fn main() {}"}}
        }));
        match decision {
            Decision::Act { call, record, .. } => {
                assert_eq!(
                    call,
                    ToolCall::CreateArtifact {
                        title: "Draft".to_string(),
                        kind: ArtifactKind::Code,
                        content: "fn main() {}".to_string()
                    }
                );
                assert_eq!(record.name, CREATE_ARTIFACT);
            }
            other => panic!("unexpected decision: {:?}", other),
        }

        let delegate = ToolCall::parse(
            DELEGATE_TASK,
            json!({"title": "Research", "agentName": "Scout"}).as_object().unwrap(),
        )
        .unwrap();
        assert_eq!(
            delegate,
            ToolCall::Delegate {
                title: "Research".to_string(),
                details: String::new(),
                agent_name: Some("Scout".to_string())
            }
        );
    }

    #[test]
    fn test_generic_tool_call_keeps_args() {
        let decision = Decision::from_value(&json!({
            "thought": "Remember this",
            "toolCall": {"name": "memory_save", "args": {"key": "k", "value": "v"}}
        }));
        match decision {
            Decision::Act {
                call: ToolCall::Invoke { name, args },
                ..
            } => {
                assert_eq!(name, "memory_save");
                assert_eq!(args["key"], "k");
                assert_eq!(args["value"], "v");
            }
            other => panic!("unexpected decision: {:?}", other),
        }
    }

    #[test]
    fn test_malformed_replies_degrade_to_clarification() {
        let malformed = [
            json!("just text"),
            json!({"thought": "no tool"}),
            json!({"toolCall": {"name": "memory_save"}}),
            json!({"thought": "x", "toolCall": {"args": {}}}),
            json!({"thought": "x", "toolCall": {"name": "createArtifact", "args": {"title": "no content"}}}),
            json!({"thought": "x", "toolCall": {"name": "memory_save", "args": [1, 2]}}),
        ];

        for value in malformed {
            match Decision::from_value(&value) {
                Decision::Act {
                    call: ToolCall::AskClarification { question },
                    record,
                    ..
                } => {
                    assert!(question.contains("could not interpret"));
                    assert_eq!(record.name, ASK_CLARIFICATION);
                }
                other => panic!("{} should degrade, got {:?}", value, other),
            }
        }
    }
}

// ABOUTME: Run events, structured log entries and the sinks that receive them
// ABOUTME: The engine reports task snapshots, logs, artifacts and run outcomes through an EventSink

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use super::task::{Agent, Task};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Success,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub task_id: Option<String>,
    pub agent: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Markdown,
    Code,
    Json,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub id: String,
    pub title: String,
    pub kind: ArtifactKind,
    pub content: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Record announced when delegation spawns a new agent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AgentRecord {
    pub agent_name: String,
    pub agent: Agent,
    pub task_id: String,
    pub delegator_task_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "kebab-case")]
pub enum RunEvent {
    TaskUpdated(Task),
    TasksReplaced(Vec<Task>),
    Log(LogEntry),
    ArtifactCreated(Artifact),
    AgentCreated(AgentRecord),
    RunFinished,
    RunFailed { reason: String },
}

pub trait EventSink: Send + Sync {
    fn emit(&self, event: RunEvent);
}

/// Forwards events over an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<RunEvent>,
}

/// Renders events as tracing records
#[derive(Debug, Clone, Default)]
pub struct TracingSink;

#[derive(Debug, Clone, Default)]
pub struct NullSink;

impl LogEntry {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            task_id: None,
            agent: None,
            message: message.into(),
        }
    }

    pub fn for_task(task: &Task, level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            level,
            task_id: Some(task.id.clone()),
            agent: Some(task.agent.name.clone()),
            message: message.into(),
        }
    }
}

impl Artifact {
    pub fn new(title: impl Into<String>, kind: ArtifactKind, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            kind,
            content: content.into(),
            created_by: None,
            created_at: Utc::now(),
        }
    }

    pub fn created_by(mut self, task_id: impl Into<String>) -> Self {
        self.created_by = Some(task_id.into());
        self
    }
}

impl ArtifactKind {
    pub fn parse(value: &str) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "markdown" | "md" => ArtifactKind::Markdown,
            "code" => ArtifactKind::Code,
            "json" => ArtifactKind::Json,
            _ => ArtifactKind::Text,
        }
    }
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<RunEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: RunEvent) {
        // A dropped receiver means nobody is watching any more
        let _ = self.sender.send(event);
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: RunEvent) {
        match event {
            RunEvent::TaskUpdated(task) => {
                debug!("Task '{}' ({}) is now {}", task.title, task.id, task.status)
            }
            RunEvent::TasksReplaced(tasks) => debug!("Task list replaced: {} tasks", tasks.len()),
            // Already traced by the run context when it was recorded
            RunEvent::Log(_) => {}
            RunEvent::ArtifactCreated(artifact) => {
                info!("Artifact created: {} ({:?})", artifact.title, artifact.kind)
            }
            RunEvent::AgentCreated(record) => info!(
                "Agent '{}' created for task {}",
                record.agent_name, record.task_id
            ),
            RunEvent::RunFinished => info!("Run finished"),
            RunEvent::RunFailed { reason } => error!("Run failed: {}", reason),
        }
    }
}

impl EventSink for NullSink {
    fn emit(&self, _event: RunEvent) {}
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Warn => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut receiver) = ChannelSink::new();
        sink.emit(RunEvent::Log(LogEntry::new(LogLevel::Info, "hello")));
        sink.emit(RunEvent::RunFinished);

        match receiver.recv().await {
            Some(RunEvent::Log(entry)) => assert_eq!(entry.message, "hello"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(matches!(receiver.recv().await, Some(RunEvent::RunFinished)));
    }

    #[test]
    fn test_channel_sink_ignores_closed_receiver() {
        let (sink, receiver) = ChannelSink::new();
        drop(receiver);
        sink.emit(RunEvent::RunFinished);
    }

    #[test]
    fn test_event_serialization_shape() {
        let event = RunEvent::RunFailed {
            reason: "stalled".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "run-failed");
        assert_eq!(json["payload"]["reason"], "stalled");
    }

    #[test]
    fn test_artifact_kind_parsing() {
        assert_eq!(ArtifactKind::parse("MD"), ArtifactKind::Markdown);
        assert_eq!(ArtifactKind::parse("code"), ArtifactKind::Code);
        assert_eq!(ArtifactKind::parse("anything"), ArtifactKind::Text);
    }
}

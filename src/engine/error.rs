// ABOUTME: Error types for the orchestration engine
// ABOUTME: Defines failures raised by task mutation, step execution, oracle calls and tool calls

use thiserror::Error;

use super::task::TaskStatus;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Duplicate task id: {task_id}")]
    DuplicateTask { task_id: String },

    #[error("Task '{task_id}' depends on itself")]
    SelfDependency { task_id: String },

    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task_id} is already {status} and can no longer change")]
    TaskFinalized { task_id: String, status: TaskStatus },

    #[error("Reasoning oracle failed for task {task_id}: {message}")]
    OracleFailed { task_id: String, message: String },

    #[error("Tool error: {0}")]
    ToolFailed(#[from] ToolError),

    #[error("Join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    #[error("System error: {0}")]
    SystemError(String),
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    #[error("Tool {tool} failed: {message}")]
    Failed { tool: String, message: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl ExecutionError {
    /// Whether a task that hit this error may be attempted again
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ExecutionError::OracleFailed { .. }
                | ExecutionError::ToolFailed(_)
                | ExecutionError::SystemError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

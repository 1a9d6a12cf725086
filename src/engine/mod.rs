// ABOUTME: Task orchestration engine for the conductor runtime
// ABOUTME: Handles dependency resolution, bounded concurrent execution, delegation, retries and stalls

pub mod context;
pub mod controller;
pub mod dependency;
pub mod error;
pub mod events;
pub mod executor;
pub mod oracle;
pub mod orchestrator;
pub mod result;
pub mod scheduler;
pub mod task;

pub use context::RunContext;
pub use controller::Controller;
pub use dependency::{DependencyGraph, StallReason, StallReport, StrandedTask};
pub use error::{ExecutionError, Result, ToolError};
pub use events::{
    AgentRecord, Artifact, ArtifactKind, ChannelSink, EventSink, LogEntry, LogLevel, NullSink,
    RunEvent, TracingSink,
};
pub use executor::{StepExecutor, StepOutcome};
pub use oracle::{Decision, ReasoningOracle, TaskGoal, ToolCall, ToolSurface};
pub use orchestrator::{EngineSettings, Orchestrator, Run, RunControl};
pub use result::{RunResult, RunStatus, RunSummary};
pub use scheduler::{RetryPolicy, Scheduler};
pub use task::{
    Agent, AgentRole, ReviewEntry, SubStep, Task, TaskStatus, TaskUpdate, ToolCallRecord, REASONING_AGENT_NAME,
};

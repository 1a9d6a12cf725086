// ABOUTME: Main library module for the conductor task orchestrator
// ABOUTME: Exports all core modules and provides the public API

pub mod cli;
pub mod engine;
pub mod oracle;
pub mod parser;
pub mod tools;

// Re-export commonly used types
pub use cli::{App, Args, Config};
pub use engine::{EngineSettings, Orchestrator, RunResult, RunStatus, Task, TaskStatus};
pub use oracle::ScriptedOracle;
pub use parser::{Playbook, PlaybookParser, PlaybookValidator};
pub use tools::ToolRegistry;

// Error handling
pub type Result<T> = anyhow::Result<T>;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

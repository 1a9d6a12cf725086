// ABOUTME: Parser module for YAML playbook definitions
// ABOUTME: Exports playbook parsing, validation, and data structures

pub mod error;
pub mod playbook;
pub mod task;
pub mod validation;

pub use error::{ParserError, ValidationError};
pub use playbook::{ArtifactSpec, Playbook, PlaybookParser};
pub use task::{AgentSpec, TaskSpec};
pub use validation::{PlaybookValidator, ValidationReport};

// ABOUTME: Core playbook data structures and parsing functionality
// ABOUTME: Defines the Playbook struct describing one run and converts it into engine inputs

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tokio::fs;

use super::error::{ParserError, Result, ValidationError};
use super::task::TaskSpec;
use crate::engine::events::{Artifact, ArtifactKind};
use crate::engine::task::Task;
use crate::oracle::{ScriptedOracle, ScriptedReply};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub name: String,
    pub description: Option<String>,
    /// Context prompt shared by every task of the run
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub artifacts: Vec<ArtifactSpec>,
    pub tasks: IndexMap<String, TaskSpec>,
    /// Scripts for tasks created by delegation, keyed by task title
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub scripts: IndexMap<String, Vec<ScriptedReply>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactSpec {
    pub title: String,
    #[serde(default = "default_artifact_kind")]
    pub kind: ArtifactKind,
    pub content: String,
}

fn default_artifact_kind() -> ArtifactKind {
    ArtifactKind::Markdown
}

impl Playbook {
    /// Parse playbook from YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(ParserError::IoError)?;
        Self::from_yaml(&content)
    }

    /// Parse playbook from YAML string
    pub fn from_yaml(content: &str) -> Result<Self> {
        let playbook: Playbook = serde_yaml::from_str(content).map_err(ParserError::YamlError)?;
        playbook.validate_structure()?;
        Ok(playbook)
    }

    fn validate_structure(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(ParserError::MissingField("name".to_string()));
        }

        if self.tasks.is_empty() {
            return Err(ParserError::ValidationError(ValidationError::EmptyPlaybook));
        }

        Ok(())
    }

    pub fn task_ids(&self) -> Vec<String> {
        self.tasks.keys().cloned().collect()
    }

    pub fn get_task(&self, task_id: &str) -> Option<&TaskSpec> {
        self.tasks.get(task_id)
    }

    /// Tasks that list `task_id` among their direct dependencies
    pub fn get_dependent_tasks(&self, task_id: &str) -> Vec<String> {
        self.tasks
            .iter()
            .filter(|(_, task)| task.depends_on.iter().any(|dep| dep == task_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Engine tasks in playbook order, all `Queued`
    pub fn to_tasks(&self, default_max_retries: u32) -> Vec<Task> {
        self.tasks
            .iter()
            .map(|(id, spec)| spec.to_task(id, default_max_retries))
            .collect()
    }

    pub fn initial_artifacts(&self) -> Vec<Artifact> {
        self.artifacts
            .iter()
            .map(|a| Artifact::new(a.title.clone(), a.kind.clone(), a.content.clone()))
            .collect()
    }

    /// Oracle replaying per-task scripts by id and the `scripts` section by title
    pub fn scripted_oracle(&self) -> ScriptedOracle {
        let per_task = self
            .tasks
            .iter()
            .filter_map(|(id, spec)| spec.script.clone().map(|script| (id.clone(), script)));

        ScriptedOracle::new()
            .with_scripts(self.scripts.clone())
            .with_scripts(per_task)
    }

    /// Task ids whose title is shared with another task
    pub fn duplicate_titles(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.tasks
            .values()
            .filter(|task| !seen.insert(task.title.as_str()))
            .map(|task| task.title.clone())
            .collect()
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(ParserError::YamlError)
    }

    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml = self.to_yaml()?;
        std::fs::write(path.as_ref(), yaml).map_err(ParserError::IoError)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlaybookParser;

impl PlaybookParser {
    pub fn new() -> Self {
        Self
    }

    pub async fn parse_file<P: AsRef<Path>>(&self, path: P) -> Result<Playbook> {
        let content = fs::read_to_string(path.as_ref())
            .await
            .map_err(ParserError::IoError)?;
        self.parse_string(&content)
    }

    pub fn parse_string(&self, content: &str) -> Result<Playbook> {
        Playbook::from_yaml(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::oracle::{ReasoningOracle, TaskGoal};
    use crate::engine::task::TaskStatus;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const LAUNCH: &str = r#"
name: launch
description: Prepare a product launch
context: We are launching a note-taking app.

artifacts:
  - title: Brief
    content: "Target audience: students"

tasks:
  research:
    title: Research competitors
    script:
      - thought: Delegate the deep dive
        toolCall:
          name: create_and_delegate_task_to_new_agent
          args: {title: Competitor deep dive}
  copy:
    title: Write launch copy
    depends_on: [research]
    max_retries: 0
  review:
    title: Review copy
    agent: {role: reviewer, name: Editor}
    depends_on: [copy]

scripts:
  Competitor deep dive:
    - finished: true
      finalThought: Three competitors found
"#;

    #[test]
    fn test_parse_playbook() {
        let playbook = Playbook::from_yaml(LAUNCH).unwrap();

        assert_eq!(playbook.name, "launch");
        assert_eq!(playbook.task_ids(), vec!["research", "copy", "review"]);
        assert_eq!(playbook.get_dependent_tasks("research"), vec!["copy"]);
        assert_eq!(playbook.initial_artifacts()[0].kind, ArtifactKind::Markdown);
        assert!(playbook.duplicate_titles().is_empty());
    }

    #[test]
    fn test_to_tasks() {
        let playbook = Playbook::from_yaml(LAUNCH).unwrap();
        let tasks = playbook.to_tasks(2);

        assert_eq!(tasks.len(), 3);
        assert!(tasks.iter().all(|t| t.status == TaskStatus::Queued));
        assert_eq!(tasks[0].max_retries, 2);
        assert_eq!(tasks[1].max_retries, 0);
        assert!(tasks[2].depends_on("copy"));
    }

    #[tokio::test]
    async fn test_scripted_oracle_covers_tasks_and_delegates() {
        let playbook = Playbook::from_yaml(LAUNCH).unwrap();
        let oracle = playbook.scripted_oracle();
        assert!(oracle.has_script("research"));
        assert!(oracle.has_script("Competitor deep dive"));

        let goal = TaskGoal {
            task_id: "generated-id".to_string(),
            title: "Competitor deep dive".to_string(),
            details: String::new(),
            context_prompt: playbook.context.clone(),
            connected_services: Vec::new(),
            preferences: Default::default(),
        };
        let reply = oracle.decide(&goal, &[], &[]).await.unwrap();
        assert_eq!(reply["finalThought"], "Three competitors found");
    }

    #[test]
    fn test_structure_errors() {
        assert!(matches!(
            Playbook::from_yaml("name: \"\"\ntasks:\n  a: {title: A}\n"),
            Err(ParserError::MissingField(_))
        ));
        assert!(matches!(
            Playbook::from_yaml("name: empty\ntasks: {}\n"),
            Err(ParserError::ValidationError(ValidationError::EmptyPlaybook))
        ));
        assert!(matches!(
            Playbook::from_yaml("name: [broken"),
            Err(ParserError::YamlError(_))
        ));
    }

    #[tokio::test]
    async fn test_file_round_trip() {
        let playbook = Playbook::from_yaml(LAUNCH).unwrap();
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file
            .write_all(playbook.to_yaml().unwrap().as_bytes())
            .unwrap();

        let loaded = PlaybookParser::new()
            .parse_file(temp_file.path())
            .await
            .unwrap();
        assert_eq!(loaded.tasks.len(), 3);
        assert_eq!(loaded.scripts.len(), 1);
    }
}

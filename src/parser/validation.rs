// ABOUTME: Playbook validation logic and dependency checking
// ABOUTME: Reports unknown and circular dependencies, malformed tasks and scripts that will never run

use std::collections::{HashSet, VecDeque};

use super::error::{Result, ValidationError};
use super::playbook::Playbook;
use crate::engine::dependency::DependencyGraph;

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

pub struct PlaybookValidator {
    strict_mode: bool,
}

impl PlaybookValidator {
    pub fn new() -> Self {
        Self { strict_mode: false }
    }

    /// In strict mode warnings also make the playbook invalid
    pub fn with_strict_mode(mut self, strict: bool) -> Self {
        self.strict_mode = strict;
        self
    }

    /// Validate a complete playbook
    pub fn validate(&self, playbook: &Playbook) -> Result<ValidationReport> {
        let mut report = ValidationReport::new();

        self.validate_dependencies(playbook, &mut report);
        self.validate_task_specs(playbook, &mut report);
        self.validate_scripts(playbook, &mut report);
        self.check_unreachable_tasks(playbook, &mut report);

        report.is_valid = report.errors.is_empty() && !(self.strict_mode && report.has_warnings());
        Ok(report)
    }

    /// Validate task dependencies and detect cycles
    fn validate_dependencies(&self, playbook: &Playbook, report: &mut ValidationReport) {
        for (task_id, spec) in &playbook.tasks {
            if spec.depends_on.iter().any(|dep| dep == task_id) {
                report.errors.push(ValidationError::SelfDependency {
                    task: task_id.clone(),
                });
            }
        }

        let graph = DependencyGraph::from_tasks(&playbook.to_tasks(0));
        for (task, dependency) in graph.missing_dependencies() {
            report.errors.push(ValidationError::UnknownDependency {
                task: task.clone(),
                dependency: dependency.clone(),
            });
        }

        if !graph.has_cycle() {
            return;
        }
        for members in graph.cycles() {
            // Self-loops are already reported above
            if members.len() > 1 {
                report
                    .errors
                    .push(ValidationError::CircularDependency { tasks: members });
            }
        }
    }

    fn validate_task_specs(&self, playbook: &Playbook, report: &mut ValidationReport) {
        for (task_id, spec) in &playbook.tasks {
            if spec.title.trim().is_empty() {
                report.errors.push(ValidationError::InvalidTaskConfig {
                    task: task_id.clone(),
                    reason: "title cannot be empty".to_string(),
                });
            }

            let mut seen = HashSet::new();
            for dep in &spec.depends_on {
                if !seen.insert(dep) {
                    report
                        .warnings
                        .push(format!("Task '{}' lists dependency '{}' twice", task_id, dep));
                }
            }
        }

        for title in playbook.duplicate_titles() {
            report.warnings.push(format!(
                "Title '{}' is used by several tasks; title-keyed scripts will be shared",
                title
            ));
        }
    }

    fn validate_scripts(&self, playbook: &Playbook, report: &mut ValidationReport) {
        for (task_id, spec) in &playbook.tasks {
            if spec.script.is_some() && !spec.uses_reasoning_loop() {
                report.warnings.push(format!(
                    "Task '{}' has a script but its agent '{}' does not run the reasoning loop",
                    task_id, spec.agent.name
                ));
            }
        }

        for (key, script) in &playbook.scripts {
            if script.is_empty() {
                report
                    .warnings
                    .push(format!("Script '{}' has no replies", key));
            }
        }
    }

    /// Check for tasks that can never be executed
    fn check_unreachable_tasks(&self, playbook: &Playbook, report: &mut ValidationReport) {
        let root_tasks: Vec<String> = playbook
            .tasks
            .iter()
            .filter(|(_, spec)| spec.depends_on.is_empty())
            .map(|(task_id, _)| task_id.clone())
            .collect();

        if root_tasks.is_empty() {
            report
                .warnings
                .push("No root tasks found - all tasks have dependencies".to_string());
            return;
        }

        // A task is reachable once every one of its dependencies is reachable
        let mut reachable = HashSet::new();
        let mut queue = VecDeque::from(root_tasks);

        while let Some(current) = queue.pop_front() {
            if !reachable.insert(current.clone()) {
                continue;
            }
            for dependent in playbook.get_dependent_tasks(&current) {
                let ready = playbook
                    .get_task(&dependent)
                    .map(|spec| spec.depends_on.iter().all(|dep| reachable.contains(dep)))
                    .unwrap_or(false);
                if ready && !reachable.contains(&dependent) {
                    queue.push_back(dependent);
                }
            }
        }

        for task_id in playbook.tasks.keys() {
            if !reachable.contains(task_id) {
                report
                    .warnings
                    .push(format!("Task '{}' is unreachable", task_id));
            }
        }
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            errors: Vec::new(),
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }
}

impl Default for PlaybookValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(yaml: &str) -> ValidationReport {
        let playbook = Playbook::from_yaml(yaml).unwrap();
        PlaybookValidator::new().validate(&playbook).unwrap()
    }

    #[test]
    fn test_circular_dependency_detection() {
        let report = validate(
            r#"
name: circular
tasks:
  x: {title: X, depends_on: [y]}
  y: {title: Y, depends_on: [x]}
"#,
        );

        assert!(report.has_errors());
        assert_eq!(
            report.errors,
            vec![ValidationError::CircularDependency {
                tasks: vec!["x".to_string(), "y".to_string()]
            }]
        );
        assert!(report
            .warnings
            .contains(&"No root tasks found - all tasks have dependencies".to_string()));
    }

    #[test]
    fn test_unknown_and_self_dependency() {
        let report = validate(
            r#"
name: broken
tasks:
  a: {title: A, depends_on: [ghost]}
  b: {title: B, depends_on: [b]}
  c: {title: C}
"#,
        );

        assert!(report.errors.contains(&ValidationError::UnknownDependency {
            task: "a".to_string(),
            dependency: "ghost".to_string()
        }));
        assert!(report.errors.contains(&ValidationError::SelfDependency {
            task: "b".to_string()
        }));
        assert!(!report.is_valid);
    }

    #[test]
    fn test_warnings() {
        let report = validate(
            r#"
name: warnings
tasks:
  a:
    title: Review
    agent: {role: reviewer, name: Editor}
    script:
      - finished: true
  b: {title: Review, depends_on: [a, a]}
"#,
        );

        assert!(!report.has_errors());
        assert!(report.is_valid);
        assert_eq!(report.warnings.len(), 3);

        let playbook = Playbook::from_yaml(
            "name: strict\ntasks:\n  a: {title: A}\n  b: {title: A}\n",
        )
        .unwrap();
        let strict = PlaybookValidator::new()
            .with_strict_mode(true)
            .validate(&playbook)
            .unwrap();
        assert!(!strict.is_valid);
    }

    #[test]
    fn test_valid_playbook() {
        let report = validate(
            r#"
name: valid
tasks:
  a: {title: A}
  b: {title: B, depends_on: [a]}
  c: {title: C, depends_on: [a, b]}
"#,
        );

        assert!(!report.has_errors());
        assert!(!report.has_warnings());
        assert!(report.is_valid);
    }
}

// ABOUTME: Run result types and outcome classification
// ABOUTME: Aggregates final task states, artifacts and stall diagnostics of a completed run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::dependency::StallReport;
use super::events::Artifact;
use super::task::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Success,
    Failed,
    Stalled,
    Stopped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub run_id: String,
    pub status: RunStatus,
    pub reason: Option<String>,
    pub stall: Option<StallReport>,
    pub tasks: Vec<Task>,
    pub artifacts: Vec<Artifact>,
    pub summary: RunSummary,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    #[serde(default, with = "humantime_serde")]
    pub duration: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub total_tasks: usize,
    pub done_tasks: usize,
    pub failed_tasks: usize,
    pub cancelled_tasks: usize,
    pub unresolved_tasks: usize,
    pub success_rate: f64,
}

impl RunResult {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            reason: None,
            stall: None,
            tasks: Vec::new(),
            artifacts: Vec::new(),
            summary: RunSummary::default(),
            start_time: Utc::now(),
            end_time: None,
            duration: None,
        }
    }

    /// Record the final state of the run and derive the summary
    pub fn finish(&mut self, tasks: Vec<Task>, artifacts: Vec<Artifact>) {
        self.tasks = tasks;
        self.artifacts = artifacts;
        self.summary = RunSummary::from_tasks(&self.tasks);
        let end_time = Utc::now();
        self.end_time = Some(end_time);
        self.duration = Some((end_time - self.start_time).to_std().unwrap_or(Duration::ZERO));
    }

    pub fn mark_stopped(&mut self) {
        self.status = RunStatus::Stopped;
        self.reason = Some("Run stopped by request".to_string());
    }

    pub fn mark_stalled(&mut self, report: StallReport) {
        self.status = RunStatus::Stalled;
        self.reason = Some(report.to_string());
        self.stall = Some(report);
    }

    /// Success when every task is `Done` or `Cancelled`, failure otherwise
    pub fn classify(&mut self) {
        let summary = &self.summary;
        if summary.failed_tasks == 0 && summary.unresolved_tasks == 0 {
            self.status = RunStatus::Success;
            self.reason = None;
        } else {
            self.status = RunStatus::Failed;
            self.reason = Some(format!(
                "{} task(s) failed, {} task(s) unresolved",
                summary.failed_tasks, summary.unresolved_tasks
            ));
        }
    }

    pub fn task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == task_id)
    }

    pub fn status_of(&self, task_id: &str) -> Option<TaskStatus> {
        self.task(task_id).map(|t| t.status)
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

impl RunSummary {
    pub fn from_tasks(tasks: &[Task]) -> Self {
        let count = |status: TaskStatus| tasks.iter().filter(|t| t.status == status).count();

        let total = tasks.len();
        let done = count(TaskStatus::Done);
        let failed = count(TaskStatus::Error);
        let cancelled = count(TaskStatus::Cancelled);

        let success_rate = if total > 0 {
            (done as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        Self {
            total_tasks: total,
            done_tasks: done,
            failed_tasks: failed,
            cancelled_tasks: cancelled,
            unresolved_tasks: total - done - failed - cancelled,
            success_rate,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Success => write!(f, "success"),
            RunStatus::Failed => write!(f, "failed"),
            RunStatus::Stalled => write!(f, "stalled"),
            RunStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str, status: TaskStatus) -> Task {
        let mut task = Task::with_id(id, id, "");
        task.status = status;
        task
    }

    #[test]
    fn test_done_and_cancelled_is_success() {
        let mut result = RunResult::new("run");
        result.finish(
            vec![task("a", TaskStatus::Done), task("b", TaskStatus::Cancelled)],
            Vec::new(),
        );
        result.classify();

        assert!(result.is_success());
        assert_eq!(result.summary.success_rate, 50.0);
        assert!(result.duration.is_some());
    }

    #[test]
    fn test_failed_and_unresolved_tasks_are_reported() {
        let mut result = RunResult::new("run");
        result.finish(
            vec![
                task("a", TaskStatus::Done),
                task("b", TaskStatus::Error),
                task("c", TaskStatus::PendingReview),
            ],
            Vec::new(),
        );
        result.classify();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.summary.unresolved_tasks, 1);
        assert_eq!(
            result.reason.as_deref(),
            Some("1 task(s) failed, 1 task(s) unresolved")
        );
    }

    #[test]
    fn test_result_serializes_camel_case() {
        let mut result = RunResult::new("run");
        result.finish(Vec::new(), Vec::new());
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["runId"], "run");
        assert!(json["summary"]["totalTasks"].is_number());
        assert!(json["duration"].is_string());
    }
}

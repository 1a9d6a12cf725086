// ABOUTME: Common utilities and helpers for integration tests
// ABOUTME: Provides playbook builders, test oracles, tool stubs and an event recorder

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use conductor::engine::{
    Artifact, EngineSettings, EventSink, LogEntry, Orchestrator, ReasoningOracle, RetryPolicy,
    RunEvent, SubStep, Task, TaskGoal, TaskStatus, ToolError, ToolSurface,
};
use conductor::oracle::ScriptedReply;
use conductor::parser::{Playbook, TaskSpec};

/// Builds playbooks in code and writes them as YAML
pub struct TestPlaybookBuilder {
    playbook: Playbook,
}

impl TestPlaybookBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            playbook: Playbook {
                name: name.to_string(),
                description: Some(format!("Test playbook: {}", name)),
                context: String::new(),
                artifacts: Vec::new(),
                tasks: Default::default(),
                scripts: Default::default(),
            },
        }
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.playbook.context = context.to_string();
        self
    }

    pub fn add_task(mut self, id: &str, title: &str) -> Self {
        self.playbook
            .tasks
            .insert(id.to_string(), TaskSpec::new(title));
        self
    }

    pub fn add_dependent_task(mut self, id: &str, title: &str, depends_on: Vec<&str>) -> Self {
        let mut spec = TaskSpec::new(title);
        spec.depends_on = depends_on.into_iter().map(str::to_string).collect();
        self.playbook.tasks.insert(id.to_string(), spec);
        self
    }

    /// Attach a script to the most recently added task
    pub fn with_script(mut self, replies: Vec<Value>) -> Self {
        if let Some((_, spec)) = self.playbook.tasks.last_mut() {
            spec.script = Some(replies.into_iter().map(ScriptedReply::Reply).collect());
        }
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        if let Some((_, spec)) = self.playbook.tasks.last_mut() {
            spec.max_retries = Some(max_retries);
        }
        self
    }

    /// Script for tasks created by delegation, keyed by their title
    pub fn with_delegation_script(mut self, title: &str, replies: Vec<Value>) -> Self {
        self.playbook.scripts.insert(
            title.to_string(),
            replies.into_iter().map(ScriptedReply::Reply).collect(),
        );
        self
    }

    pub fn build(self) -> Playbook {
        self.playbook
    }

    pub fn to_yaml(&self) -> String {
        self.playbook.to_yaml().expect("playbook serializes")
    }

    pub async fn write_to_file(&self, path: &Path) -> std::io::Result<()> {
        tokio::fs::write(path, self.to_yaml()).await
    }
}

pub struct TestEnvironment {
    pub temp_dir: TempDir,
}

impl TestEnvironment {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub async fn create_playbook_file(&self, name: &str, builder: &TestPlaybookBuilder) -> PathBuf {
        let path = self.path().join(format!("{}.yaml", name));
        builder
            .write_to_file(&path)
            .await
            .expect("Failed to write playbook file");
        path
    }

    pub async fn create_file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.path().join(name);
        tokio::fs::write(&path, content)
            .await
            .expect("Failed to write file");
        path
    }

    pub fn output_file(&self, name: &str) -> PathBuf {
        self.path().join(format!("{}.json", name))
    }
}

/// Settings with no artificial waiting so tests run quickly
pub fn fast_settings(max_concurrent_tasks: usize) -> EngineSettings {
    EngineSettings {
        max_concurrent_tasks,
        max_steps: 10,
        retry: RetryPolicy::fixed_delay(2, Duration::from_millis(5)),
        simulated_task_delay: Duration::from_millis(10),
        ..EngineSettings::default()
    }
}

pub fn finished(final_thought: &str) -> Value {
    json!({"finished": true, "finalThought": final_thought})
}

pub fn tool_call(thought: &str, name: &str, args: Value) -> Value {
    json!({"thought": thought, "toolCall": {"name": name, "args": args}})
}

/// Records every event emitted during a run
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<RunEvent>>,
}

impl EventRecorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<RunEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn logs(&self) -> Vec<LogEntry> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                RunEvent::Log(entry) => Some(entry),
                _ => None,
            })
            .collect()
    }

    /// Position of the first snapshot showing `task_id` in `status`
    pub fn first_status(&self, task_id: &str, status: TaskStatus) -> Option<usize> {
        self.events().iter().position(|event| {
            matches!(event, RunEvent::TaskUpdated(task) if task.id == task_id && task.status == status)
        })
    }

    /// Highest number of tasks observed `Executing` at the same time
    pub fn max_executing(&self) -> usize {
        let mut current: HashMap<String, TaskStatus> = HashMap::new();
        let mut max = 0;
        for event in self.events() {
            match event {
                RunEvent::TaskUpdated(task) => {
                    current.insert(task.id.clone(), task.status);
                }
                RunEvent::TasksReplaced(tasks) => {
                    for task in tasks {
                        current.insert(task.id.clone(), task.status);
                    }
                }
                _ => continue,
            }
            let executing = current
                .values()
                .filter(|status| **status == TaskStatus::Executing)
                .count();
            max = max.max(executing);
        }
        max
    }
}

impl EventSink for EventRecorder {
    fn emit(&self, event: RunEvent) {
        self.events.lock().unwrap().push(event);
    }
}

/// Fails every call and counts the calls per task
#[derive(Default)]
pub struct FailingOracle {
    calls: Mutex<HashMap<String, usize>>,
}

impl FailingOracle {
    pub fn calls(&self, task_id: &str) -> usize {
        self.calls.lock().unwrap().get(task_id).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ReasoningOracle for FailingOracle {
    async fn decide(
        &self,
        goal: &TaskGoal,
        _history: &[SubStep],
        _artifacts: &[Artifact],
    ) -> Result<Value, String> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(goal.task_id.clone())
            .or_insert(0) += 1;
        Err("model unavailable".to_string())
    }
}

/// Takes a while to answer and tracks how many tasks were thinking at once
pub struct SlowOracle {
    delay: Duration,
    active: AtomicUsize,
    peak: AtomicUsize,
    order: Mutex<Vec<String>>,
}

impl SlowOracle {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            order: Mutex::new(Vec::new()),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    /// Task ids in the order their first call started
    pub fn order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReasoningOracle for SlowOracle {
    async fn decide(
        &self,
        goal: &TaskGoal,
        _history: &[SubStep],
        _artifacts: &[Artifact],
    ) -> Result<Value, String> {
        {
            let mut order = self.order.lock().unwrap();
            if !order.contains(&goal.task_id) {
                order.push(goal.task_id.clone());
            }
        }
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(finished(&format!("{} is done", goal.title)))
    }
}

/// Answers every call by delegating; with `only` set, other tasks finish instead
#[derive(Default)]
pub struct DelegatingOracle {
    only: Option<String>,
    calls: AtomicUsize,
}

impl DelegatingOracle {
    pub fn only(task_id: &str) -> Self {
        Self {
            only: Some(task_id.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReasoningOracle for DelegatingOracle {
    async fn decide(
        &self,
        goal: &TaskGoal,
        history: &[SubStep],
        _artifacts: &[Artifact],
    ) -> Result<Value, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.only {
            Some(id) if *id != goal.task_id => Ok(finished("Helped")),
            _ => Ok(tool_call(
                "Someone else should do this",
                "create_and_delegate_task_to_new_agent",
                json!({"title": format!("{} helper {}", goal.title, history.len())}),
            )),
        }
    }
}

/// Tool surface that echoes its arguments; the tool named "explode" fails
#[derive(Default)]
pub struct EchoTools;

#[async_trait]
impl ToolSurface for EchoTools {
    async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<Value, ToolError> {
        if name == "explode" {
            return Err(ToolError::Failed {
                tool: name.to_string(),
                message: "boom".to_string(),
            });
        }
        Ok(json!({"tool": name, "args": args}))
    }
}

pub fn orchestrator(
    settings: EngineSettings,
    oracle: Arc<dyn ReasoningOracle>,
    recorder: &Arc<EventRecorder>,
) -> Orchestrator {
    Orchestrator::new(settings, oracle, Arc::new(EchoTools)).with_event_sink(recorder.clone())
}

pub fn task(id: &str, deps: &[&str]) -> Task {
    Task::with_id(id, format!("Task {}", id), "").with_dependencies(deps.iter().copied())
}

/// Poll until `task_id` reaches `status` or a second passes
pub async fn wait_for_status(control: &conductor::engine::RunControl, task_id: &str, status: TaskStatus) -> bool {
    for _ in 0..200 {
        if control
            .tasks()
            .await
            .iter()
            .any(|t| t.id == task_id && t.status == status)
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}

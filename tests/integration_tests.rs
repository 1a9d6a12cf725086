// ABOUTME: End-to-end tests running complete playbooks through the orchestrator
// ABOUTME: Exercises scripted oracles, built-in tools, artifacts and delegation together

use std::sync::Arc;

use conductor::engine::{ArtifactKind, LogLevel, Orchestrator, RunStatus, TaskStatus};
use conductor::parser::{Playbook, PlaybookValidator};
use conductor::tools::{ToolRegistry, ToolSettings};

mod common;
use common::{fast_settings, EventRecorder, TestEnvironment};

const LAUNCH: &str = r#"
name: launch
description: Prepare a product launch
context: We are launching a note-taking app for students.

artifacts:
  - title: Brief
    content: "Audience: students"

tasks:
  research:
    title: Research competitors
    script:
      - thought: A specialist should do the deep dive
        toolCall:
          name: create_and_delegate_task_to_new_agent
          args:
            title: Competitor deep dive
            agentName: Analyst
      - finished: true
        finalThought: Research done

  copy:
    title: Write launch copy
    depends_on: [research]
    script:
      - error: rate limited
      - thought: Write it down
        toolCall:
          name: createArtifact
          args:
            title: Launch copy
            type: markdown
            content: '# Take better notes'
      - finished: true
        finalThought: Copy drafted

  review:
    title: Review copy
    agent: {role: reviewer, name: Editor}
    depends_on: [copy]

scripts:
  Competitor deep dive:
    - thought: Keep the findings for later
      toolCall:
        name: memory_save
        args:
          key: competitors
          value: [Notion, Evernote]
          tags: [research]
    - thought: Check what was stored
      toolCall:
        name: memory_retrieve
        args:
          tags: [research]
    - finished: true
      finalThought: Two competitors found
"#;

fn orchestrator_for(
    playbook: &Playbook,
    env: &TestEnvironment,
    recorder: &Arc<EventRecorder>,
) -> Orchestrator {
    let tool_settings = ToolSettings {
        memory_store_path: env.path().join("memories.json"),
        ..ToolSettings::default()
    };

    Orchestrator::new(
        fast_settings(2),
        Arc::new(playbook.scripted_oracle()),
        Arc::new(ToolRegistry::with_builtins(&tool_settings)),
    )
    .with_event_sink(recorder.clone())
}

#[tokio::test]
async fn test_launch_playbook_end_to_end() {
    let env = TestEnvironment::new();
    let recorder = EventRecorder::new();
    let playbook = Playbook::from_yaml(LAUNCH).unwrap();

    let report = PlaybookValidator::new().validate(&playbook).unwrap();
    assert!(report.is_valid);

    let orchestrator = orchestrator_for(&playbook, &env, &recorder);
    let tasks = playbook.to_tasks(orchestrator.settings().retry.max_retries);
    let result = orchestrator
        .run(tasks, playbook.context.clone(), playbook.initial_artifacts())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Success, "{:?}", result.reason);
    assert_eq!(result.summary.total_tasks, 4);
    assert_eq!(result.summary.done_tasks, 4);

    // Delegated child stored its findings through the memory tool
    let stored = std::fs::read_to_string(env.path().join("memories.json")).unwrap();
    assert!(stored.contains("Evernote"));
    let child = result
        .tasks
        .iter()
        .find(|t| t.title == "Competitor deep dive")
        .unwrap();
    assert_eq!(child.delegator_task_id.as_deref(), Some("research"));
    assert!(child.sub_steps[1].observation.contains("Notion"));

    // The first oracle failure on copy was retried
    let copy = result.task("copy").unwrap();
    assert_eq!(copy.retry_count, 1);

    let titles: Vec<&str> = result.artifacts.iter().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Brief", "Launch copy"]);
    assert_eq!(result.artifacts[1].kind, ArtifactKind::Markdown);
    assert_eq!(result.artifacts[1].content, "# Take better notes");
    assert_eq!(result.artifacts[1].created_by.as_deref(), Some("copy"));

    let review = result.task("review").unwrap();
    assert_eq!(review.status, TaskStatus::Done);
    assert!(review.sub_steps.is_empty());
    assert!(review
        .logs
        .iter()
        .any(|entry| entry.level == LogLevel::Info && entry.message.contains("Editor (reviewer)")));
}

#[tokio::test]
async fn test_tool_errors_surface_as_observations() {
    let env = TestEnvironment::new();
    let recorder = EventRecorder::new();
    let playbook = Playbook::from_yaml(
        r#"
name: forgetful
tasks:
  recall:
    title: Recall something
    max_retries: 0
    script:
      - thought: Look it up without saying what
        toolCall:
          name: memory_retrieve
          args: {}
"#,
    )
    .unwrap();

    let orchestrator = orchestrator_for(&playbook, &env, &recorder);
    let result = orchestrator
        .run(playbook.to_tasks(0), playbook.context.clone(), Vec::new())
        .await
        .unwrap();

    assert_eq!(result.status, RunStatus::Failed);
    let recall = result.task("recall").unwrap();
    assert_eq!(recall.status, TaskStatus::Error);
    assert!(recall.sub_steps[0].observation.starts_with("Error:"));
}

#[tokio::test]
async fn test_validator_catches_what_would_stall() {
    let playbook = Playbook::from_yaml(
        r#"
name: loop
tasks:
  x: {title: X, depends_on: [y]}
  y: {title: Y, depends_on: [x]}
"#,
    )
    .unwrap();

    let report = PlaybookValidator::new().validate(&playbook).unwrap();
    assert!(!report.is_valid);

    let env = TestEnvironment::new();
    let recorder = EventRecorder::new();
    let orchestrator = orchestrator_for(&playbook, &env, &recorder);
    let result = orchestrator
        .run(playbook.to_tasks(0), "", Vec::new())
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Stalled);
}

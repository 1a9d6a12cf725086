// ABOUTME: Command implementations for the conductor CLI
// ABOUTME: Handles execution of run, validate, init, and tool commands

use anyhow::Result;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use super::args::{PlaybookTemplate, ToolRequest};
use super::config::Config;
use crate::engine::{Orchestrator, RunResult, RunStatus};
use crate::parser::{Playbook, PlaybookParser, PlaybookValidator, ValidationReport};
use crate::tools::ToolRegistry;

/// Execute a playbook
pub async fn run_playbook(
    playbook_path: PathBuf,
    max_concurrent: Option<usize>,
    output: Option<PathBuf>,
    dry_run: bool,
    config: &Config,
) -> Result<()> {
    info!("Starting playbook run: {}", playbook_path.display());

    let playbook = load_playbook(&playbook_path).await?;
    let report = PlaybookValidator::new().validate(&playbook)?;
    print_warnings(&report);
    if !report.is_valid {
        return Err(invalid_playbook(&playbook, &report));
    }
    info!("Loaded playbook: {}", playbook.name);

    if dry_run {
        println!(
            "✓ Playbook '{}' is valid ({} tasks); dry run, nothing executed",
            playbook.name,
            playbook.tasks.len()
        );
        return Ok(());
    }

    let mut settings = config.engine_settings();
    if let Some(cap) = max_concurrent {
        settings.max_concurrent_tasks = cap.max(1);
    }
    let tasks = playbook.to_tasks(settings.retry.max_retries);

    let orchestrator = Orchestrator::new(
        settings,
        Arc::new(playbook.scripted_oracle()),
        Arc::new(ToolRegistry::with_builtins(&config.tool_settings())),
    );
    let run = orchestrator
        .prepare(tasks, playbook.context.clone(), playbook.initial_artifacts())
        .map_err(|e| anyhow::anyhow!("Failed to prepare run: {}", e))?;

    let control = run.control();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping run");
            control.stop();
        }
    });

    let result = orchestrator.execute(run).await;
    interrupt.abort();

    if let Some(output_path) = output {
        let json_content = serde_json::to_string_pretty(&result)
            .map_err(|e| anyhow::anyhow!("Failed to serialize results to JSON: {}", e))?;
        std::fs::write(&output_path, json_content).map_err(|e| {
            anyhow::anyhow!(
                "Failed to write output file '{}': {}",
                output_path.display(),
                e
            )
        })?;
        info!("Results written to: {}", output_path.display());
    } else {
        print_summary(&playbook, &result);
    }

    // Non-success must surface as a non-zero exit code
    match result.status {
        RunStatus::Success => Ok(()),
        status => Err(anyhow::anyhow!(
            "Run finished with status {}: {}",
            status,
            result.reason.unwrap_or_default()
        )),
    }
}

/// Validate a playbook file
pub async fn validate_playbook(playbook_path: PathBuf, strict: bool) -> Result<()> {
    info!("Validating playbook: {}", playbook_path.display());

    let playbook = load_playbook(&playbook_path).await?;
    let report = PlaybookValidator::new()
        .with_strict_mode(strict)
        .validate(&playbook)?;
    print_warnings(&report);

    if !report.is_valid {
        return Err(invalid_playbook(&playbook, &report));
    }

    println!("✓ Playbook '{}' is valid", playbook.name);
    println!("  Tasks: {}", playbook.tasks.len());
    println!("  Initial artifacts: {}", playbook.artifacts.len());
    println!("  Delegation scripts: {}", playbook.scripts.len());

    Ok(())
}

/// Initialize a new playbook file
pub async fn init_playbook(
    name: String,
    output_dir: PathBuf,
    template: PlaybookTemplate,
) -> Result<()> {
    info!(
        "Initializing playbook '{}' in {}",
        name,
        output_dir.display()
    );

    if !output_dir.exists() {
        std::fs::create_dir_all(&output_dir)?;
    }

    let playbook_file = output_dir.join(format!("{}.yaml", name));
    if playbook_file.exists() {
        return Err(anyhow::anyhow!(
            "Playbook file already exists: {}",
            playbook_file.display()
        ));
    }

    std::fs::write(&playbook_file, generate_playbook_template(&name, template))?;
    println!("Created playbook: {}", playbook_file.display());

    Ok(())
}

/// Invoke one built-in tool and print its JSON result
pub async fn invoke_tool(request: ToolRequest, config: &Config) -> Result<()> {
    let registry = ToolRegistry::with_builtins(&config.tool_settings());

    match registry.execute(&request.name, &request.args).await {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({"success": false, "error": err.to_string()}))?
            );
            Err(anyhow::anyhow!("Tool '{}' failed", request.name))
        }
    }
}

async fn load_playbook(path: &Path) -> Result<Playbook> {
    PlaybookParser::new()
        .parse_file(path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to parse playbook '{}': {}", path.display(), e))
}

fn print_warnings(report: &ValidationReport) {
    for warning in &report.warnings {
        println!("  warning: {}", warning);
    }
}

fn invalid_playbook(playbook: &Playbook, report: &ValidationReport) -> anyhow::Error {
    for error in &report.errors {
        println!("  error: {}", error);
    }
    anyhow::anyhow!(
        "Playbook '{}' is invalid: {} error(s), {} warning(s)",
        playbook.name,
        report.errors.len(),
        report.warnings.len()
    )
}

fn print_summary(playbook: &Playbook, result: &RunResult) {
    println!(
        "Playbook '{}' finished with status: {}",
        playbook.name, result.status
    );
    if let Some(ref reason) = result.reason {
        println!("  Reason: {}", reason);
    }

    for task in &result.tasks {
        println!("  Task '{}' ({}): {}", task.title, task.id, task.status);
        if let Some(last) = task.sub_steps.last() {
            println!("    Last thought: {}", last.thought.trim());
        }
    }

    if let Some(ref stall) = result.stall {
        for stranded in &stall.stranded {
            println!("  Stranded '{}': {}", stranded.title, stranded.reason);
        }
    }

    for artifact in &result.artifacts {
        println!("  Artifact '{}' ({:?})", artifact.title, artifact.kind);
    }

    let summary = &result.summary;
    println!(
        "  {}/{} done, {} failed, {} cancelled, {} unresolved",
        summary.done_tasks,
        summary.total_tasks,
        summary.failed_tasks,
        summary.cancelled_tasks,
        summary.unresolved_tasks
    );
}

/// Generate playbook template content
fn generate_playbook_template(name: &str, template: PlaybookTemplate) -> String {
    match template {
        PlaybookTemplate::Basic => generate_basic_template(name),
        PlaybookTemplate::Delegation => generate_delegation_template(name),
    }
}

fn generate_basic_template(name: &str) -> String {
    format!(
        r#"name: {}
description: A basic playbook with two dependent tasks
context: Replace this with the background every task should know about.

tasks:
  draft:
    title: Draft the outline
    details: Produce a first outline as an artifact
    script:
      - thought: I will write the outline down
        toolCall:
          name: createArtifact
          args:
            title: Outline
            type: markdown
            content: '# Outline'
      - finished: true
        finalThought: The outline is ready

  review:
    title: Review the outline
    depends_on: [draft]
    agent:
      role: reviewer
      name: Reviewer
"#,
        name
    )
}

fn generate_delegation_template(name: &str) -> String {
    format!(
        r#"name: {}
description: A playbook where one task delegates part of its work
context: Replace this with the background every task should know about.

tasks:
  research:
    title: Research the topic
    script:
      - thought: A specialist should collect the sources
        toolCall:
          name: create_and_delegate_task_to_new_agent
          args:
            title: Collect sources
            details: Find three reliable sources
            agentName: Librarian
      - finished: true
        finalThought: Research complete with the collected sources

  summarize:
    title: Summarize findings
    depends_on: [research]

scripts:
  Collect sources:
    - thought: Remember the sources for later
      toolCall:
        name: memory_save
        args:
          key: sources
          value: ["source one", "source two", "source three"]
          tags: [research]
    - finished: true
      finalThought: Three sources collected
"#,
        name
    )
}

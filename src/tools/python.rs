// ABOUTME: Data analysis tools that run Python scripts in a subprocess
// ABOUTME: Implements data_analyze and data_visualize on top of a temporary script file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::io::Write;
use std::path::Path;
use std::process::{Output, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tracing::{debug, info};

use super::{parse_args, Result, ToolImplementation};

/// Runs a script with the configured interpreter from a temporary `.py` file
pub struct PythonRunner {
    interpreter: String,
}

pub struct DataAnalyzeTool {
    runner: Arc<PythonRunner>,
}

pub struct DataVisualizeTool {
    runner: Arc<PythonRunner>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct AnalyzeArgs {
    script: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VisualizeArgs {
    script: String,
    output_path: String,
}

impl PythonRunner {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }

    pub async fn run(&self, script: &str) -> Result<Output> {
        let mut temp_file = tempfile::Builder::new().suffix(".py").tempfile()?;
        temp_file.write_all(script.as_bytes())?;
        temp_file.flush()?;

        info!(
            "Running script ({} bytes) with {}",
            script.len(),
            self.interpreter
        );

        // The temporary file is removed when it drops after the process exits
        let output = Command::new(&self.interpreter)
            .arg(temp_file.path())
            .stdin(Stdio::null())
            .output()
            .await?;

        debug!("Script exited with {:?}", output.status.code());
        Ok(output)
    }
}

fn exit_code(output: &Output) -> i32 {
    output.status.code().unwrap_or(-1)
}

impl DataAnalyzeTool {
    pub fn new(runner: Arc<PythonRunner>) -> Self {
        Self { runner }
    }
}

impl DataVisualizeTool {
    pub fn new(runner: Arc<PythonRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl ToolImplementation for DataAnalyzeTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let args: AnalyzeArgs = parse_args(self.name(), args)?;
        let output = self.runner.run(&args.script).await?;
        let returncode = exit_code(&output);

        Ok(json!({
            "success": returncode == 0,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "returncode": returncode,
        }))
    }

    fn name(&self) -> &'static str {
        "data_analyze"
    }
}

#[async_trait]
impl ToolImplementation for DataVisualizeTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let args: VisualizeArgs = parse_args(self.name(), args)?;
        let output = self.runner.run(&args.script).await?;
        let returncode = exit_code(&output);
        let output_exists = Path::new(&args.output_path).exists();

        Ok(json!({
            "success": returncode == 0 && output_exists,
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "returncode": returncode,
            "output_exists": output_exists,
            "output_path": args.output_path,
        }))
    }

    fn name(&self) -> &'static str {
        "data_visualize"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::error::ToolError;

    // `sh` stands in for the interpreter so the tests do not need Python installed
    fn runner() -> Arc<PythonRunner> {
        Arc::new(PythonRunner::new("sh"))
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_analyze_captures_output() {
        let tool = DataAnalyzeTool::new(runner());
        let result = tool
            .invoke(&args(json!({"script": "echo mean=4.2\necho warn >&2"})))
            .await
            .unwrap();

        assert_eq!(result["success"], true);
        assert_eq!(result["returncode"], 0);
        assert_eq!(result["stdout"], "mean=4.2\n");
        assert_eq!(result["stderr"], "warn\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_not_an_error() {
        let tool = DataAnalyzeTool::new(runner());
        let result = tool.invoke(&args(json!({"script": "exit 3"}))).await.unwrap();

        assert_eq!(result["success"], false);
        assert_eq!(result["returncode"], 3);
    }

    #[tokio::test]
    async fn test_visualize_requires_output_file() {
        let dir = tempfile::tempdir().unwrap();
        let chart = dir.path().join("chart.png");
        let tool = DataVisualizeTool::new(runner());

        let missing = tool
            .invoke(&args(json!({"script": "true", "output_path": chart.to_string_lossy()})))
            .await
            .unwrap();
        assert_eq!(missing["success"], false);
        assert_eq!(missing["output_exists"], false);

        let script = format!("touch '{}'", chart.display());
        let created = tool
            .invoke(&args(json!({"script": script, "output_path": chart.to_string_lossy()})))
            .await
            .unwrap();
        assert_eq!(created["success"], true);
        assert_eq!(created["output_path"], chart.to_string_lossy().to_string());
    }

    #[tokio::test]
    async fn test_missing_script_argument() {
        let tool = DataAnalyzeTool::new(runner());
        let result = tool.invoke(&Map::new()).await;
        assert!(matches!(result, Err(ToolError::InvalidArguments { .. })));
    }
}

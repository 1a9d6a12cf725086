// ABOUTME: Command line argument definitions and parsing using Clap
// ABOUTME: Defines the main CLI structure and subcommands for conductor

use clap::{Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "A concurrent task orchestrator with dependency resolution and delegation")]
#[command(version)]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Path to configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, global = true, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a playbook
    Run {
        #[arg(help = "Path to playbook YAML file")]
        playbook: PathBuf,

        #[arg(long, help = "Maximum number of concurrent tasks")]
        max_concurrent: Option<usize>,

        #[arg(short, long, help = "Write the run result as JSON to this file")]
        output: Option<PathBuf>,

        #[arg(long, help = "Dry run - validate without executing")]
        dry_run: bool,
    },

    /// Validate a playbook file without executing
    Validate {
        #[arg(help = "Path to playbook YAML file")]
        playbook: PathBuf,

        #[arg(long, help = "Treat warnings as errors")]
        strict: bool,
    },

    /// Initialize a new playbook file from template
    Init {
        #[arg(help = "Name of the playbook to create")]
        name: String,

        #[arg(short, long, help = "Output directory", default_value = ".")]
        output_dir: PathBuf,

        #[arg(long, help = "Playbook template type", value_enum, default_value_t = PlaybookTemplate::Basic)]
        template: PlaybookTemplate,
    },

    /// Invoke a single built-in tool and print its JSON result
    Tool {
        #[arg(long, help = "Tool name", required_unless_present = "request_json")]
        name: Option<String>,

        #[arg(long, help = "Tool arguments as a JSON object", requires = "name")]
        args_json: Option<String>,

        #[arg(
            long,
            help = "Full request as JSON: {\"name\": ..., \"args\": {...}}",
            conflicts_with_all = ["name", "args_json"]
        )]
        request_json: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PlaybookTemplate {
    Basic,
    Delegation,
}

/// A tool name with its argument object
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub name: String,
    pub args: Map<String, Value>,
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl ToolRequest {
    /// Build a request from either `--name/--args-json` or `--request-json`
    pub fn from_flags(
        name: Option<&str>,
        args_json: Option<&str>,
        request_json: Option<&str>,
    ) -> anyhow::Result<Self> {
        if let Some(request) = request_json {
            let value: Value = serde_json::from_str(request)
                .map_err(|e| anyhow::anyhow!("Invalid request JSON: {}", e))?;
            let name = value
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| anyhow::anyhow!("Request JSON needs a string 'name'"))?
                .to_string();
            let args = match value.get("args") {
                None | Some(Value::Null) => Map::new(),
                Some(args) => Self::object(args.clone())?,
            };
            return Ok(Self { name, args });
        }

        let name = name
            .ok_or_else(|| anyhow::anyhow!("Either --name or --request-json is required"))?
            .to_string();
        let args = match args_json {
            Some(raw) => Self::object(
                serde_json::from_str(raw)
                    .map_err(|e| anyhow::anyhow!("Invalid arguments JSON: {}", e))?,
            )?,
            None => Map::new(),
        };
        Ok(Self { name, args })
    }

    fn object(value: Value) -> anyhow::Result<Map<String, Value>> {
        match value {
            Value::Object(map) => Ok(map),
            other => Err(anyhow::anyhow!(
                "Tool arguments must be a JSON object, got: {}",
                other
            )),
        }
    }
}

// ABOUTME: Configuration management for the conductor application
// ABOUTME: Loads settings from YAML files and environment variables and hands them to the engine

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::{EngineSettings, RetryPolicy};
use crate::tools::ToolSettings;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub max_concurrent_tasks: usize,

    pub max_steps: usize,

    pub max_delegation_depth: usize,

    pub retry: RetryPolicy,

    #[serde(with = "humantime_serde")]
    pub simulated_task_delay: Duration,

    pub memory_store_path: PathBuf,

    pub python: String,

    pub connected_services: Vec<String>,

    pub preferences: HashMap<String, String>,

    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for Config {
    fn default() -> Self {
        let engine = EngineSettings::default();
        let tools = ToolSettings::default();
        Self {
            max_concurrent_tasks: engine.max_concurrent_tasks,
            max_steps: engine.max_steps,
            max_delegation_depth: engine.max_delegation_depth,
            retry: engine.retry,
            simulated_task_delay: engine.simulated_task_delay,
            memory_store_path: tools.memory_store_path,
            python: tools.python,
            connected_services: Vec::new(),
            preferences: HashMap::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from file path or default locations
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p,
            None => Self::find_config_file()?,
        };

        let mut config = if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", config_path.display(), e))?
        } else {
            Config::default()
        };

        // Environment wins over the file
        config.merge_env()?;
        Ok(config)
    }

    /// Find configuration file in standard locations
    fn find_config_file() -> Result<PathBuf> {
        let possible_paths = vec![
            PathBuf::from("conductor.yaml"),
            PathBuf::from("conductor.yml"),
            PathBuf::from(".conductor.yaml"),
            PathBuf::from(".conductor.yml"),
        ];

        for path in possible_paths {
            if path.exists() {
                return Ok(path);
            }
        }

        if let Some(home_dir) = dirs::home_dir() {
            let home_config = home_dir.join(".conductor").join("config.yaml");
            if home_config.exists() {
                return Ok(home_config);
            }
        }

        // Return default path (may not exist)
        Ok(PathBuf::from("conductor.yaml"))
    }

    /// Merge environment variables into configuration
    fn merge_env(&mut self) -> Result<()> {
        self.merge_vars(|name| std::env::var(name).ok())
    }

    fn merge_vars<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(max_tasks) = lookup("CONDUCTOR_MAX_CONCURRENT") {
            self.max_concurrent_tasks = max_tasks
                .parse()
                .map_err(|e| anyhow::anyhow!("CONDUCTOR_MAX_CONCURRENT: {}", e))?;
        }
        if let Some(max_steps) = lookup("CONDUCTOR_MAX_STEPS") {
            self.max_steps = max_steps
                .parse()
                .map_err(|e| anyhow::anyhow!("CONDUCTOR_MAX_STEPS: {}", e))?;
        }
        if let Some(store) = lookup("CONDUCTOR_MEMORY_STORE") {
            self.memory_store_path = PathBuf::from(store);
        }
        if let Some(python) = lookup("CONDUCTOR_PYTHON") {
            self.python = python;
        }
        if let Some(level) = lookup("CONDUCTOR_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("CONDUCTOR_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Settings handed to the orchestrator; fixed for the lifetime of a run
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            max_concurrent_tasks: self.max_concurrent_tasks.max(1),
            max_steps: self.max_steps,
            max_delegation_depth: self.max_delegation_depth,
            retry: self.retry.clone(),
            simulated_task_delay: self.simulated_task_delay,
            connected_services: self.connected_services.clone(),
            preferences: self.preferences.clone(),
        }
    }

    pub fn tool_settings(&self) -> ToolSettings {
        ToolSettings {
            memory_store_path: self.memory_store_path.clone(),
            python: self.python.clone(),
        }
    }
}

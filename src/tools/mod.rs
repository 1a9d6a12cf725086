// ABOUTME: Built-in tool implementations reachable from the reasoning loop
// ABOUTME: Provides the tool registry plus memory store and Python script tools

pub mod memory;
pub mod python;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::engine::error::ToolError;
use crate::engine::oracle::ToolSurface;

pub type Result<T> = std::result::Result<T, ToolError>;

#[async_trait]
pub trait ToolImplementation: Send + Sync {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value>;

    fn name(&self) -> &'static str;
}

/// Where the built-in tools keep their state and which interpreter they run
#[derive(Debug, Clone)]
pub struct ToolSettings {
    pub memory_store_path: PathBuf,
    pub python: String,
}

pub struct ToolRegistry {
    implementations: HashMap<String, Box<dyn ToolImplementation>>,
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            memory_store_path: PathBuf::from(".conductor_memories.json"),
            python: "python3".to_string(),
        }
    }
}

impl ToolRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            implementations: HashMap::new(),
        }
    }

    /// A registry holding every built-in tool
    pub fn with_builtins(settings: &ToolSettings) -> Self {
        let mut registry = Self::new();

        let store = Arc::new(memory::MemoryStore::new(settings.memory_store_path.clone()));
        registry.register(Box::new(memory::MemorySaveTool::new(Arc::clone(&store))));
        registry.register(Box::new(memory::MemoryRetrieveTool::new(Arc::clone(&store))));
        registry.register(Box::new(memory::MemoryDeleteTool::new(store)));

        let runner = Arc::new(python::PythonRunner::new(settings.python.clone()));
        registry.register(Box::new(python::DataAnalyzeTool::new(Arc::clone(&runner))));
        registry.register(Box::new(python::DataVisualizeTool::new(runner)));

        registry
    }

    pub fn register(&mut self, implementation: Box<dyn ToolImplementation>) {
        let name = implementation.name().to_string();
        self.implementations.insert(name, implementation);
    }

    pub fn get_implementation(&self, name: &str) -> Option<&dyn ToolImplementation> {
        self.implementations.get(name).map(|imp| imp.as_ref())
    }

    pub fn list_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.implementations.keys().map(|k| k.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        let implementation = self
            .get_implementation(name)
            .ok_or_else(|| ToolError::UnknownTool {
                name: name.to_string(),
            })?;

        debug!("Invoking tool {}", name);
        let result = implementation.invoke(args).await;
        if let Err(ref err) = result {
            warn!("Tool {} failed: {}", name, err);
        }
        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolSurface for ToolRegistry {
    async fn invoke(&self, name: &str, args: &Map<String, Value>) -> Result<Value> {
        self.execute(name, args).await
    }
}

/// Deserialize tool arguments, rejecting unknown or mistyped fields
pub(crate) fn parse_args<T: DeserializeOwned>(tool: &str, args: &Map<String, Value>) -> Result<T> {
    serde_json::from_value(Value::Object(args.clone())).map_err(|e| ToolError::InvalidArguments {
        tool: tool.to_string(),
        reason: e.to_string(),
    })
}

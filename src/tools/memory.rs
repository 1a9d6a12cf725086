// ABOUTME: Persistent key/value memory tools backed by a JSON file
// ABOUTME: Implements memory_save, memory_retrieve and memory_delete over a shared store

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::debug;

use super::{parse_args, Result, ToolImplementation};
use crate::engine::error::ToolError;

/// One remembered item. Fields are declared in key order so the store file
/// comes out sorted.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryItem {
    pub key: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub value: Value,
}

/// JSON file holding every memory item, keyed by item key
pub struct MemoryStore {
    path: PathBuf,
    lock: Mutex<()>,
}

pub struct MemorySaveTool {
    store: Arc<MemoryStore>,
}

pub struct MemoryRetrieveTool {
    store: Arc<MemoryStore>,
}

pub struct MemoryDeleteTool {
    store: Arc<MemoryStore>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SaveArgs {
    key: String,
    value: Value,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RetrieveArgs {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteArgs {
    key: String,
}

impl MemoryStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    async fn load(&self, tool: &str) -> Result<BTreeMap<String, MemoryItem>> {
        if !fs::try_exists(&self.path).await? {
            return Ok(BTreeMap::new());
        }

        let contents = fs::read_to_string(&self.path).await?;
        serde_json::from_str(&contents).map_err(|e| ToolError::Failed {
            tool: tool.to_string(),
            message: format!("Memory store is corrupted: {}", e),
        })
    }

    async fn save(&self, items: &BTreeMap<String, MemoryItem>) -> Result<()> {
        let contents = serde_json::to_string_pretty(items)?;
        fs::write(&self.path, contents).await?;
        debug!("Wrote {} memory item(s) to {}", items.len(), self.path.display());
        Ok(())
    }
}

impl MemorySaveTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl MemoryRetrieveTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

impl MemoryDeleteTool {
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl ToolImplementation for MemorySaveTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let args: SaveArgs = parse_args(self.name(), args)?;
        if args.key.is_empty() {
            return Err(ToolError::InvalidArguments {
                tool: self.name().to_string(),
                reason: "'key' is required for memory_save".to_string(),
            });
        }

        let _guard = self.store.lock.lock().await;
        let mut items = self.store.load(self.name()).await?;
        items.insert(
            args.key.clone(),
            MemoryItem {
                key: args.key.clone(),
                tags: args.tags.unwrap_or_default(),
                value: args.value,
            },
        );
        self.store.save(&items).await?;

        Ok(json!({
            "success": true,
            "message": format!("Memory item '{}' saved successfully.", args.key),
        }))
    }

    fn name(&self) -> &'static str {
        "memory_save"
    }
}

#[async_trait]
impl ToolImplementation for MemoryRetrieveTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let args: RetrieveArgs = parse_args(self.name(), args)?;

        let _guard = self.store.lock.lock().await;
        let items = self.store.load(self.name()).await?;

        let data: Vec<&MemoryItem> = match (args.key.as_deref(), args.tags.as_deref()) {
            (Some(key), _) if !key.is_empty() => items.get(key).into_iter().collect(),
            (_, Some(tags)) if !tags.is_empty() => items
                .values()
                .filter(|item| tags.iter().all(|tag| item.tags.contains(tag)))
                .collect(),
            _ => {
                return Err(ToolError::InvalidArguments {
                    tool: self.name().to_string(),
                    reason: "Provide either 'key' or 'tags' for memory_retrieve".to_string(),
                })
            }
        };

        Ok(json!({ "success": true, "data": data }))
    }

    fn name(&self) -> &'static str {
        "memory_retrieve"
    }
}

#[async_trait]
impl ToolImplementation for MemoryDeleteTool {
    async fn invoke(&self, args: &Map<String, Value>) -> Result<Value> {
        let args: DeleteArgs = parse_args(self.name(), args)?;

        let _guard = self.store.lock.lock().await;
        let mut items = self.store.load(self.name()).await?;
        let existed = items.remove(&args.key).is_some();
        self.store.save(&items).await?;

        let message = if existed {
            format!("Memory item '{}' deleted successfully.", args.key)
        } else {
            format!("Memory item '{}' was not found.", args.key)
        };

        Ok(json!({ "success": true, "message": message }))
    }

    fn name(&self) -> &'static str {
        "memory_delete"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Tools {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        save: MemorySaveTool,
        retrieve: MemoryRetrieveTool,
        delete: MemoryDeleteTool,
    }

    fn tools() -> Tools {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::new(dir.path().join("memories.json")));
        Tools {
            save: MemorySaveTool::new(Arc::clone(&store)),
            retrieve: MemoryRetrieveTool::new(Arc::clone(&store)),
            delete: MemoryDeleteTool::new(Arc::clone(&store)),
            store,
            _dir: dir,
        }
    }

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_save_and_retrieve_by_key() {
        let tools = tools();
        let saved = tools
            .save
            .invoke(&args(json!({"key": "city", "value": "Lisbon", "tags": ["travel"]})))
            .await
            .unwrap();
        assert_eq!(saved["message"], "Memory item 'city' saved successfully.");

        let found = tools.retrieve.invoke(&args(json!({"key": "city"}))).await.unwrap();
        assert_eq!(found["data"][0]["value"], "Lisbon");

        let missing = tools.retrieve.invoke(&args(json!({"key": "other"}))).await.unwrap();
        assert_eq!(missing["data"], json!([]));
    }

    #[tokio::test]
    async fn test_retrieve_by_tags_requires_all_tags() {
        let tools = tools();
        for (key, tags) in [("a", json!(["x", "y"])), ("b", json!(["x"])), ("c", json!([]))] {
            tools
                .save
                .invoke(&args(json!({"key": key, "value": key, "tags": tags})))
                .await
                .unwrap();
        }

        let both = tools
            .retrieve
            .invoke(&args(json!({"tags": ["x", "y"]})))
            .await
            .unwrap();
        assert_eq!(both["data"].as_array().unwrap().len(), 1);

        let x = tools.retrieve.invoke(&args(json!({"tags": ["x"]}))).await.unwrap();
        assert_eq!(x["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_argument_errors() {
        let tools = tools();

        let empty_key = tools.save.invoke(&args(json!({"key": "", "value": "v"}))).await;
        assert!(matches!(empty_key, Err(ToolError::InvalidArguments { .. })));

        let neither = tools.retrieve.invoke(&Map::new()).await;
        assert!(matches!(neither, Err(ToolError::InvalidArguments { .. })));

        let unexpected = tools
            .delete
            .invoke(&args(json!({"key": "k", "force": true})))
            .await;
        assert!(matches!(unexpected, Err(ToolError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn test_delete_reports_whether_item_existed() {
        let tools = tools();
        tools
            .save
            .invoke(&args(json!({"key": "k", "value": 1})))
            .await
            .unwrap();

        let first = tools.delete.invoke(&args(json!({"key": "k"}))).await.unwrap();
        assert_eq!(first["message"], "Memory item 'k' deleted successfully.");

        let second = tools.delete.invoke(&args(json!({"key": "k"}))).await.unwrap();
        assert_eq!(second["success"], true);
        assert_eq!(second["message"], "Memory item 'k' was not found.");
    }

    #[tokio::test]
    async fn test_store_file_is_sorted_and_corruption_is_reported() {
        let tools = tools();
        for key in ["zeta", "alpha"] {
            tools
                .save
                .invoke(&args(json!({"key": key, "value": "v"})))
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(tools.store.path()).unwrap();
        assert!(contents.find("alpha").unwrap() < contents.find("zeta").unwrap());
        assert!(contents.contains("\n  \""));

        std::fs::write(tools.store.path(), "{not json").unwrap();
        let result = tools.retrieve.invoke(&args(json!({"key": "alpha"}))).await;
        match result {
            Err(ToolError::Failed { message, .. }) => {
                assert!(message.starts_with("Memory store is corrupted"))
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }
}

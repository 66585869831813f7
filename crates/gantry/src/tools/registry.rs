//! Name → (schema, handler) registry with shared-reader discipline:
//! registration is rare, lookups are per-tool-call.

use super::{ToolHandler, ToolSchema};
use std::collections::HashMap;
use tokio::sync::RwLock;

struct RegisteredTool {
    schema: ToolSchema,
    handler: ToolHandler,
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_tool(&self, schema: ToolSchema, handler: ToolHandler) {
        let mut tools = self.tools.write().await;
        tools.insert(schema.name.clone(), RegisteredTool { schema, handler });
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn get_schema(&self, name: &str) -> Option<ToolSchema> {
        self.tools.read().await.get(name).map(|t| t.schema.clone())
    }

    pub async fn get_handler(&self, name: &str) -> Option<ToolHandler> {
        self.tools.read().await.get(name).map(|t| t.handler.clone())
    }

    pub async fn list_schemas(&self) -> Vec<ToolSchema> {
        let mut out: Vec<ToolSchema> = self
            .tools
            .read()
            .await
            .values()
            .map(|t| t.schema.clone())
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Schemas for exactly the requested names, skipping unknowns,
    /// preserving request order.
    pub async fn filter_schemas(&self, allow_names: &[String]) -> Vec<ToolSchema> {
        let tools = self.tools.read().await;
        allow_names
            .iter()
            .filter_map(|name| tools.get(name).map(|t| t.schema.clone()))
            .collect()
    }
}

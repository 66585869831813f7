pub mod builtin;
pub mod fs;
pub mod registry;
pub mod repair;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON-Schema-shaped parameters:
    /// `{type: "object", properties: {...}, required: [...]}`.
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    /// Always a syntactically valid JSON value, never raw free text.
    pub arguments_json: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_call_id: String,
    pub name: String,
    pub result: Value,
    pub ok: bool,
    pub error: String,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, name: impl Into<String>, result: Value) -> Self {
        let mut result = result;
        if let Some(obj) = result.as_object_mut() {
            obj.entry("ok").or_insert(json!(true));
        }
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            result,
            ok: true,
            error: String::new(),
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        let error = error.into();
        Self {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            result: json!({ "ok": false, "error": error }),
            ok: false,
            error,
        }
    }
}

/// Handlers are pure from the registry's view: given a call id and
/// arguments they produce a ToolResult. Async so MCP proxies fit.
pub type ToolHandler = Arc<dyn Fn(String, Value) -> BoxFuture<'static, ToolResult> + Send + Sync>;

/// Wrap a synchronous function as a handler.
pub fn sync_handler<F>(f: F) -> ToolHandler
where
    F: Fn(String, Value) -> ToolResult + Send + Sync + 'static,
{
    Arc::new(move |id, args| {
        let result = f(id, args);
        async move { result }.boxed()
    })
}

pub use registry::ToolRegistry;

pub fn extract_tool_names(tools: &[ToolSchema]) -> Vec<String> {
    tools.iter().map(|t| t.name.clone()).collect()
}

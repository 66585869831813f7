//! Registers remote MCP tools into the runtime tool registry and routes
//! calls back out. Name collisions across servers resolve by prefixing
//! later-discovered tools with `mcpN.` (1-based server index).

use super::{McpClient, McpToolInfo};
use crate::config::McpConfig;
use crate::logging::{sanitize_json_for_log, truncate_for_log};
use crate::tools::fs::normalize_under_root;
use crate::tools::{ToolRegistry, ToolResult, ToolSchema};
use anyhow::{anyhow, Result};
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct McpBridge {
    clients: Vec<Arc<McpClient>>,
    name_maps: Mutex<Vec<HashMap<String, String>>>,
    workspace_root: String,
}

fn make_file_uri(normalized_path: &str) -> String {
    if normalized_path.is_empty() {
        return "file:///".to_string();
    }
    if normalized_path.starts_with('/') {
        format!("file://{}", normalized_path)
    } else {
        format!("file:///{}", normalized_path)
    }
}

fn log_call(id: &str, exposed: &str, remote: &str, arguments: &Value) {
    tracing::info!(
        id,
        exposed,
        remote,
        arguments = %truncate_for_log(&sanitize_json_for_log(arguments), 2000),
        "mcp call"
    );
}

fn log_result(id: &str, exposed: &str, remote: &str, ok: bool, result: &Value) {
    tracing::info!(
        id,
        exposed,
        remote,
        ok,
        result = %truncate_for_log(&sanitize_json_for_log(result), 2000),
        "mcp result"
    );
}

fn result_from_remote(id: String, exposed: &str, remote: &str, outcome: Result<Value>) -> ToolResult {
    match outcome {
        Ok(result) => {
            let is_error = result
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            log_result(&id, exposed, remote, !is_error, &result);
            if is_error {
                let mut r = ToolResult::failure(id, exposed, "mcp tool reported error");
                // keep the remote payload alongside the mirrored error
                r.result = result;
                if let Some(obj) = r.result.as_object_mut() {
                    obj.entry("ok").or_insert(json!(false));
                    obj.entry("error").or_insert(json!(r.error.clone()));
                }
                r
            } else {
                ToolResult::success(id, exposed, result)
            }
        }
        Err(e) => {
            let r = ToolResult::failure(id, exposed, e.to_string());
            log_result(&r.tool_call_id, exposed, remote, false, &r.result);
            r
        }
    }
}

impl McpBridge {
    /// Connect to every configured endpoint, keeping the ones whose
    /// `initialize` succeeds.
    pub async fn connect(cfg: &McpConfig, workspace_root: &str) -> Self {
        let mut clients = Vec::new();
        for host in &cfg.hosts {
            let client = Arc::new(McpClient::new(host.clone(), cfg));
            match client.initialize().await {
                Ok(_) => clients.push(client),
                Err(e) => {
                    tracing::warn!(host = %host.base_url(), error = %e, "mcp initialize failed");
                }
            }
        }
        let name_maps = Mutex::new(vec![HashMap::new(); clients.len()]);
        Self {
            clients,
            name_maps,
            workspace_root: workspace_root.to_string(),
        }
    }

    pub fn server_count(&self) -> usize {
        self.clients.len()
    }

    /// Re-enumerate every server's tools and (re)register proxies.
    pub async fn refresh_tools(&self, registry: &ToolRegistry) -> Value {
        let mut registered = 0usize;
        let mut errors = Vec::new();
        for (i, client) in self.clients.iter().enumerate() {
            let tools = match client.list_tools().await {
                Ok(tools) => tools,
                Err(e) => {
                    errors.push(json!({ "server": i + 1, "error": e.to_string() }));
                    continue;
                }
            };
            for tool in tools {
                self.register_proxy(registry, i, client.clone(), tool).await;
                registered += 1;
            }
        }
        json!({
            "ok": true,
            "servers": self.clients.len(),
            "registered": registered,
            "errors": errors,
        })
    }

    async fn register_proxy(
        &self,
        registry: &ToolRegistry,
        server_index: usize,
        client: Arc<McpClient>,
        tool: McpToolInfo,
    ) {
        let exposed = {
            let mut maps = self.name_maps.lock().await;
            match maps[server_index].get(&tool.name) {
                Some(existing) => existing.clone(),
                None => {
                    let mut exposed = tool.name.clone();
                    if registry.has_tool(&exposed).await {
                        exposed = format!("mcp{}.{}", server_index + 1, exposed);
                    }
                    maps[server_index].insert(tool.name.clone(), exposed.clone());
                    exposed
                }
            }
        };

        let schema = ToolSchema {
            name: exposed.clone(),
            description: if tool.description.is_empty() {
                tool.title.clone()
            } else {
                tool.description.clone()
            },
            parameters: tool.input_schema.clone(),
        };
        let remote = tool.name.clone();
        registry
            .register_tool(
                schema,
                Arc::new(move |id: String, args: Value| {
                    let client = client.clone();
                    let exposed = exposed.clone();
                    let remote = remote.clone();
                    async move {
                        log_call(&id, &exposed, &remote, &args);
                        let outcome = client.call_tool(&remote, &args).await;
                        result_from_remote(id, &exposed, &remote, outcome)
                    }
                    .boxed()
                }),
            )
            .await;
    }

    async fn call_any(&self, name: &str, args: &Value) -> Result<Value> {
        let mut last_err = anyhow!("mcp: call failed");
        for client in &self.clients {
            match client.call_tool(name, args).await {
                Ok(v) => return Ok(v),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

}

/// Convenience tools wrapping `fs.*` / `lsp.*` remote tools with
/// workspace confinement and `file://` URI construction done here.
pub async fn register_ide_tools(bridge: &Arc<McpBridge>, registry: &ToolRegistry) {
    if bridge.clients.is_empty() {
        return;
    }

    register_ide_path_tool(
        bridge,
        registry,
        "ide.read_file",
        "Read a text file under workspace root.",
        "fs.read_file",
    )
    .await;
    register_ide_search(bridge, registry).await;
    register_ide_uri_tool(
        bridge,
        registry,
        "ide.diagnostics",
        "Get diagnostics for a file.",
        "lsp.diagnostics",
        false,
    )
    .await;
    register_ide_uri_tool(
        bridge,
        registry,
        "ide.hover",
        "Get hover information at a position.",
        "lsp.hover",
        true,
    )
    .await;
    register_ide_uri_tool(
        bridge,
        registry,
        "ide.definition",
        "Get definition location at a position.",
        "lsp.definition",
        true,
    )
    .await;
}

async fn register_ide_path_tool(
    bridge: &Arc<McpBridge>,
    registry: &ToolRegistry,
    name: &str,
    description: &str,
    remote: &'static str,
) {
        let schema = ToolSchema {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        };
        let bridge = bridge.clone();
        let exposed = name.to_string();
        registry
            .register_tool(
                schema,
                Arc::new(move |id: String, args: Value| {
                    let bridge = bridge.clone();
                    let exposed = exposed.clone();
                    async move {
                        let Some(path) = args.get("path").and_then(Value::as_str) else {
                            return ToolResult::failure(id, exposed, "missing required field: path");
                        };
                        let norm = match normalize_under_root(&bridge.workspace_root, path) {
                            Ok(p) => p.to_string_lossy().replace('\\', "/"),
                            Err(e) => return ToolResult::failure(id, exposed, e),
                        };
                        let remote_args = json!({ "path": norm });
                        log_call(&id, &exposed, remote, &remote_args);
                        let outcome = bridge.call_any(remote, &remote_args).await;
                        result_from_remote(id, &exposed, remote, outcome)
                    }
                    .boxed()
                }),
            )
            .await;
    }

async fn register_ide_search(bridge: &Arc<McpBridge>, registry: &ToolRegistry) {
        let schema = ToolSchema {
            name: "ide.search".to_string(),
            description: "Search text in workspace files.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" },
                    "path": { "type": "string" },
                    "max_results": { "type": "integer" },
                },
                "required": ["query"],
            }),
        };
        let bridge = bridge.clone();
        registry
            .register_tool(
                schema,
                Arc::new(move |id: String, args: Value| {
                    let bridge = bridge.clone();
                    async move {
                        let exposed = "ide.search";
                        let Some(query) = args.get("query").and_then(Value::as_str) else {
                            return ToolResult::failure(id, exposed, "missing required field: query");
                        };
                        let mut remote_args = json!({ "query": query });
                        if let Some(n) = args.get("max_results").and_then(Value::as_i64) {
                            remote_args["max_results"] = json!(n);
                        }
                        if let Some(path) = args.get("path").and_then(Value::as_str) {
                            match normalize_under_root(&bridge.workspace_root, path) {
                                Ok(p) => {
                                    remote_args["path"] =
                                        json!(p.to_string_lossy().replace('\\', "/"));
                                }
                                Err(e) => return ToolResult::failure(id, exposed, e),
                            }
                        } else if !bridge.workspace_root.is_empty() {
                            remote_args["path"] = json!(bridge.workspace_root);
                        }
                        log_call(&id, exposed, "fs.search", &remote_args);
                        let outcome = bridge.call_any("fs.search", &remote_args).await;
                        result_from_remote(id, exposed, "fs.search", outcome)
                    }
                    .boxed()
                }),
            )
            .await;
    }

async fn register_ide_uri_tool(
    bridge: &Arc<McpBridge>,
    registry: &ToolRegistry,
    name: &str,
    description: &str,
    remote: &'static str,
    needs_position: bool,
) {
        let mut properties = json!({ "uri": { "type": "string" } });
        let mut required = vec!["uri"];
        if needs_position {
            properties["line"] = json!({ "type": "integer" });
            properties["character"] = json!({ "type": "integer" });
            required.push("line");
            required.push("character");
        }
        let schema = ToolSchema {
            name: name.to_string(),
            description: description.to_string(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
            }),
        };
        let bridge = bridge.clone();
        let exposed = name.to_string();
        registry
            .register_tool(
                schema,
                Arc::new(move |id: String, args: Value| {
                    let bridge = bridge.clone();
                    let exposed = exposed.clone();
                    async move {
                        let Some(uri) = args.get("uri").and_then(Value::as_str) else {
                            return ToolResult::failure(id, exposed, "missing required field: uri");
                        };
                        let mut remote_args = json!({});
                        if needs_position {
                            let (Some(line), Some(character)) = (
                                args.get("line").and_then(Value::as_i64),
                                args.get("character").and_then(Value::as_i64),
                            ) else {
                                return ToolResult::failure(
                                    id,
                                    exposed,
                                    "missing required fields: line, character",
                                );
                            };
                            remote_args["line"] = json!(line);
                            remote_args["character"] = json!(character);
                        }
                        let norm = match normalize_under_root(&bridge.workspace_root, uri) {
                            Ok(p) => p.to_string_lossy().replace('\\', "/"),
                            Err(e) => return ToolResult::failure(id, exposed, e),
                        };
                        remote_args["uri"] = json!(make_file_uri(&norm));
                        log_call(&id, &exposed, remote, &remote_args);
                        let outcome = bridge.call_any(remote, &remote_args).await;
                        result_from_remote(id, &exposed, remote, outcome)
                    }
                    .boxed()
                }),
            )
            .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpEndpoint;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": result,
        }))
    }

    async fn mock_server_with_tools(tools: Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "initialize" })))
            .respond_with(rpc_result(json!({ "serverInfo": { "name": "mock" } })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/list" })))
            .respond_with(rpc_result(json!({ "tools": tools })))
            .mount(&server)
            .await;
        server
    }

    fn cfg_for(servers: &[&MockServer]) -> McpConfig {
        let mut cfg = McpConfig::default();
        cfg.hosts = servers
            .iter()
            .map(|s| HttpEndpoint::parse(&s.uri(), 9000))
            .collect();
        cfg
    }

    #[tokio::test]
    async fn refresh_registers_remote_tools() {
        let server =
            mock_server_with_tools(json!([{ "name": "mcp.echo", "description": "echo" }])).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/call" })))
            .respond_with(rpc_result(json!({ "content": [{ "type": "text", "text": "hi" }] })))
            .mount(&server)
            .await;

        let bridge = Arc::new(McpBridge::connect(&cfg_for(&[&server]), "").await);
        assert_eq!(bridge.server_count(), 1);
        let registry = ToolRegistry::new();
        let summary = bridge.refresh_tools(&registry).await;
        assert_eq!(summary["registered"], json!(1));
        assert!(registry.has_tool("mcp.echo").await);

        let handler = registry.get_handler("mcp.echo").await.unwrap();
        let r = handler("c1".into(), json!({ "text": "hi" })).await;
        assert!(r.ok);
        assert_eq!(r.result["content"][0]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn collision_gets_server_prefix() {
        let a = mock_server_with_tools(json!([{ "name": "mcp.echo" }])).await;
        let b = mock_server_with_tools(json!([{ "name": "mcp.echo" }])).await;
        let bridge = Arc::new(McpBridge::connect(&cfg_for(&[&a, &b]), "").await);
        let registry = ToolRegistry::new();
        let summary = bridge.refresh_tools(&registry).await;
        assert_eq!(summary["registered"], json!(2));
        assert!(registry.has_tool("mcp.echo").await);
        assert!(registry.has_tool("mcp2.mcp.echo").await);
    }

    #[tokio::test]
    async fn is_error_maps_to_failure() {
        let server = mock_server_with_tools(json!([{ "name": "mcp.fail" }])).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/call" })))
            .respond_with(rpc_result(json!({ "isError": true, "content": [] })))
            .mount(&server)
            .await;
        let bridge = Arc::new(McpBridge::connect(&cfg_for(&[&server]), "").await);
        let registry = ToolRegistry::new();
        bridge.refresh_tools(&registry).await;
        let handler = registry.get_handler("mcp.fail").await.unwrap();
        let r = handler("c1".into(), json!({})).await;
        assert!(!r.ok);
        assert!(!r.error.is_empty());
        assert_eq!(r.result["error"], json!(r.error));
    }

    #[tokio::test]
    async fn ide_read_file_confines_paths() {
        let server = mock_server_with_tools(json!([{ "name": "fs.read_file" }])).await;
        let root = tempfile::TempDir::new().unwrap();
        let bridge = Arc::new(
            McpBridge::connect(&cfg_for(&[&server]), root.path().to_str().unwrap()).await,
        );
        let registry = ToolRegistry::new();
        register_ide_tools(&bridge, &registry).await;
        let handler = registry.get_handler("ide.read_file").await.unwrap();
        let r = handler("c1".into(), json!({ "path": "../outside.txt" })).await;
        assert!(!r.ok);
        assert_eq!(r.error, "path is outside workspace root");
    }

    #[tokio::test]
    async fn ide_hover_builds_file_uri() {
        let server = mock_server_with_tools(json!([{ "name": "lsp.hover" }])).await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/call" })))
            .respond_with(rpc_result(json!({ "contents": "fn main()" })))
            .mount(&server)
            .await;
        let root = tempfile::TempDir::new().unwrap();
        std::fs::write(root.path().join("main.rs"), "fn main() {}").unwrap();
        let bridge = Arc::new(
            McpBridge::connect(&cfg_for(&[&server]), root.path().to_str().unwrap()).await,
        );
        let registry = ToolRegistry::new();
        register_ide_tools(&bridge, &registry).await;
        let handler = registry.get_handler("ide.hover").await.unwrap();
        let r = handler(
            "c1".into(),
            json!({ "uri": "main.rs", "line": 1, "character": 2 }),
        )
        .await;
        assert!(r.ok);
        let missing = handler("c2".into(), json!({ "uri": "main.rs" })).await;
        assert_eq!(missing.error, "missing required fields: line, character");
    }

    #[test]
    fn file_uri_shapes() {
        assert_eq!(make_file_uri("/tmp/x"), "file:///tmp/x");
        assert_eq!(make_file_uri("C:/x"), "file:///C:/x");
        assert_eq!(make_file_uri(""), "file:///");
    }
}

//! JSON-RPC-over-HTTP client for MCP tool servers.
//!
//! Speaks `initialize`, `tools/list` (cursor-paginated), and
//! `tools/call` against a single endpoint. In-flight requests are
//! bounded by a counting gate; over-budget calls fail fast instead of
//! queueing behind a slow server.

pub mod bridge;

use crate::config::{HttpEndpoint, McpConfig};
use crate::request_scope;
use anyhow::{anyhow, Result};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MAX_LIST_PAGES: usize = 64;

#[derive(Debug, Clone, Default)]
pub struct McpToolInfo {
    pub name: String,
    pub title: String,
    pub description: String,
    pub input_schema: Value,
}

pub struct McpClient {
    client: Client,
    endpoint: HttpEndpoint,
    next_id: AtomicI64,
    in_flight: Arc<Semaphore>,
}

impl McpClient {
    pub fn new(endpoint: HttpEndpoint, cfg: &McpConfig) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(cfg.connect_timeout_s))
            .timeout(Duration::from_secs(cfg.read_timeout_s))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            next_id: AtomicI64::new(1),
            in_flight: Arc::new(Semaphore::new(cfg.max_in_flight)),
        }
    }

    fn url(&self) -> String {
        let base = self.endpoint.base_url();
        if self.endpoint.base_path.is_empty() {
            format!("{}/", base)
        } else {
            base
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value> {
        let Ok(_permit) = self.in_flight.try_acquire() else {
            return Err(anyhow!("mcp: too many in-flight requests"));
        };

        let payload = json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let mut builder = self.client.post(self.url()).json(&payload);
        for (k, v) in request_scope::current_auth_headers() {
            builder = builder.header(k, v);
        }
        let res = builder
            .send()
            .await
            .map_err(|_| anyhow!("mcp: failed to connect"))?;
        if !res.status().is_success() {
            return Err(anyhow!("mcp: http {}", res.status().as_u16()));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| anyhow!("mcp: invalid json response"))?;
        if let Some(error) = body.get("error").and_then(Value::as_object) {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .filter(|m| !m.is_empty())
                .unwrap_or("json-rpc error");
            return Err(anyhow!("{}", message));
        }
        body.get("result")
            .cloned()
            .ok_or_else(|| anyhow!("mcp: missing result"))
    }

    pub async fn initialize(&self) -> Result<Value> {
        self.rpc(
            "initialize",
            json!({
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "gantry", "version": env!("CARGO_PKG_VERSION") },
            }),
        )
        .await
    }

    pub async fn list_tools(&self) -> Result<Vec<McpToolInfo>> {
        let mut out = Vec::new();
        let mut cursor = String::new();
        for _page in 0..MAX_LIST_PAGES {
            let mut params = json!({});
            if !cursor.is_empty() {
                params["cursor"] = json!(cursor);
            }
            let result = self.rpc("tools/list", params).await?;
            let Some(tools) = result.get("tools").and_then(Value::as_array) else {
                return Ok(out);
            };
            for t in tools {
                let name = t
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                if name.is_empty() {
                    continue;
                }
                out.push(McpToolInfo {
                    name,
                    title: t
                        .get("title")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: t
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    input_schema: t
                        .get("inputSchema")
                        .filter(|s| s.is_object())
                        .cloned()
                        .unwrap_or_else(|| json!({})),
                });
            }
            match result.get("nextCursor").and_then(Value::as_str) {
                Some(next) if !next.is_empty() => cursor = next.to_string(),
                _ => break,
            }
        }
        Ok(out)
    }

    pub async fn call_tool(&self, name: &str, arguments: &Value) -> Result<Value> {
        self.rpc(
            "tools/call",
            json!({ "name": name, "arguments": arguments }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> McpClient {
        McpClient::new(HttpEndpoint::parse(&server.uri(), 9000), &McpConfig::default())
    }

    fn rpc_result(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0", "id": 1, "result": result,
        }))
    }

    #[tokio::test]
    async fn initialize_sends_protocol_version() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/"))
            .and(body_partial_json(json!({
                "method": "initialize",
                "params": { "protocolVersion": MCP_PROTOCOL_VERSION },
            })))
            .respond_with(rpc_result(json!({ "serverInfo": { "name": "mock" } })))
            .expect(1)
            .mount(&server)
            .await;
        client_for(&server).initialize().await.unwrap();
    }

    #[tokio::test]
    async fn list_tools_follows_cursor() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/list", "params": { "cursor": "p2" } })))
            .respond_with(rpc_result(json!({
                "tools": [{ "name": "fs.search", "description": "search" }],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({ "method": "tools/list" })))
            .respond_with(rpc_result(json!({
                "tools": [{ "name": "fs.read_file", "inputSchema": { "type": "object" } }],
                "nextCursor": "p2",
            })))
            .mount(&server)
            .await;

        let tools = client_for(&server).list_tools().await.unwrap();
        let names: Vec<_> = tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["fs.read_file", "fs.search"]);
    }

    #[tokio::test]
    async fn call_tool_returns_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(json!({
                "method": "tools/call",
                "params": { "name": "mcp.echo", "arguments": { "text": "hi" } },
            })))
            .respond_with(rpc_result(json!({ "content": [{ "type": "text", "text": "hi" }] })))
            .mount(&server)
            .await;
        let result = client_for(&server)
            .call_tool("mcp.echo", &json!({ "text": "hi" }))
            .await
            .unwrap();
        assert_eq!(result["content"][0]["text"], json!("hi"));
    }

    #[tokio::test]
    async fn jsonrpc_error_is_surfaced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "jsonrpc": "2.0", "id": 1,
                "error": { "code": -32601, "message": "method not found" },
            })))
            .mount(&server)
            .await;
        let err = client_for(&server)
            .call_tool("nope", &json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "method not found");
    }

    #[tokio::test]
    async fn in_flight_gate_fails_fast() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                rpc_result(json!({}))
                    .set_delay(Duration::from_millis(300)),
            )
            .mount(&server)
            .await;
        let mut cfg = McpConfig::default();
        cfg.max_in_flight = 1;
        let client = Arc::new(McpClient::new(
            HttpEndpoint::parse(&server.uri(), 9000),
            &cfg,
        ));

        let busy = client.clone();
        let slow = tokio::spawn(async move { busy.call_tool("a", &json!({})).await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let err = client.call_tool("b", &json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "mcp: too many in-flight requests");
        slow.await.unwrap().unwrap();
    }
}

//! Default tool roster: runtime helpers, the accepted `todowrite` sink,
//! and explicit placeholders for capabilities this runtime refuses so
//! models get a deterministic refusal instead of a parse failure.

use super::registry::ToolRegistry;
use super::{sync_handler, ToolResult, ToolSchema};
use crate::session::SessionManager;
use futures::FutureExt;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;

fn obj_schema(name: &str, description: &str, properties: Value, required: Value) -> ToolSchema {
    ToolSchema {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": properties,
            "required": required,
        }),
    }
}

async fn register_unsupported(
    registry: &ToolRegistry,
    name: &str,
    description: &str,
    properties: Value,
    required: Value,
) {
    let schema = obj_schema(name, description, properties, required);
    let tool = name.to_string();
    registry
        .register_tool(
            schema,
            sync_handler(move |id, _args| {
                ToolResult::failure(id, tool.clone(), format!("{} is unsupported", tool))
            }),
        )
        .await;
}

pub async fn register_default_tools(registry: &ToolRegistry, workspace_root: &str) {
    super::fs::register_fs_tools(registry, workspace_root).await;

    registry
        .register_tool(
            obj_schema(
                "runtime.echo",
                "Echo back the provided text.",
                json!({ "text": { "type": "string" } }),
                json!(["text"]),
            ),
            sync_handler(|id, args| {
                let Some(text) = args.get("text").and_then(Value::as_str) else {
                    return ToolResult::failure(id, "runtime.echo", "missing required field: text");
                };
                ToolResult::success(id, "runtime.echo", json!({ "ok": true, "text": text }))
            }),
        )
        .await;

    registry
        .register_tool(
            obj_schema(
                "runtime.add",
                "Add two numbers and return the sum.",
                json!({ "a": { "type": "number" }, "b": { "type": "number" } }),
                json!(["a", "b"]),
            ),
            sync_handler(|id, args| {
                let (Some(a), Some(b)) = (
                    args.get("a").and_then(Value::as_f64),
                    args.get("b").and_then(Value::as_f64),
                ) else {
                    if args.get("a").is_none() || args.get("b").is_none() {
                        return ToolResult::failure(id, "runtime.add", "missing required fields: a, b");
                    }
                    return ToolResult::failure(id, "runtime.add", "fields a and b must be numbers");
                };
                ToolResult::success(id, "runtime.add", json!({ "ok": true, "sum": a + b }))
            }),
        )
        .await;

    registry
        .register_tool(
            obj_schema(
                "runtime.time",
                "Get current unix time in seconds.",
                json!({}),
                json!([]),
            ),
            sync_handler(|id, _args| {
                ToolResult::success(
                    id,
                    "runtime.time",
                    json!({ "ok": true, "unix_seconds": chrono::Utc::now().timestamp() }),
                )
            }),
        )
        .await;

    registry
        .register_tool(
            obj_schema(
                "todowrite",
                "Write or update a todo list.",
                json!({}),
                json!([]),
            ),
            sync_handler(|id, _args| ToolResult::success(id, "todowrite", json!({ "ok": true }))),
        )
        .await;

    registry
        .register_tool(
            obj_schema(
                "invalid",
                "Invalid tool placeholder.",
                json!({ "tool": { "type": "string" }, "error": { "type": "string" } }),
                json!(["tool", "error"]),
            ),
            sync_handler(|id, args| {
                let tool = args
                    .get("tool")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("<unknown>");
                let error = args
                    .get("error")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .unwrap_or("unknown error");
                ToolResult::failure(
                    id,
                    "invalid",
                    format!("invalid tool call: {}: {}", tool, error),
                )
            }),
        )
        .await;

    register_unsupported(
        registry,
        "webfetch",
        "UNSUPPORTED: fetch web content.",
        json!({ "url": { "type": "string" } }),
        json!(["url"]),
    )
    .await;
    for alias in ["web_fetch", "WebFetch"] {
        let schema = obj_schema(
            alias,
            "UNSUPPORTED: fetch web content.",
            json!({ "url": { "type": "string" } }),
            json!(["url"]),
        );
        let tool = alias.to_string();
        registry
            .register_tool(
                schema,
                sync_handler(move |id, _args| {
                    ToolResult::failure(id, tool.clone(), format!("{} is unsupported", tool))
                }),
            )
            .await;
    }

    register_unsupported(
        registry,
        "websearch",
        "UNSUPPORTED: web search.",
        json!({
            "query": { "type": "string" },
            "num": { "type": "integer" },
            "lr": { "type": "string" },
        }),
        json!(["query"]),
    )
    .await;
    register_unsupported(
        registry,
        "codesearch",
        "UNSUPPORTED: code search.",
        json!({ "query": { "type": "string" }, "tokensNum": { "type": "integer" } }),
        json!(["query"]),
    )
    .await;
    register_unsupported(
        registry,
        "skill",
        "UNSUPPORTED: load skills.",
        json!({ "name": { "type": "string" } }),
        json!(["name"]),
    )
    .await;
    register_unsupported(
        registry,
        "question",
        "UNSUPPORTED: ask user questions.",
        json!({ "questions": { "type": "array", "items": { "type": "object" } } }),
        json!([]),
    )
    .await;
    register_unsupported(
        registry,
        "bash",
        "UNSUPPORTED: execute shell commands.",
        json!({
            "command": { "type": "string" },
            "timeout": { "type": "integer" },
            "workdir": { "type": "string" },
        }),
        json!(["command"]),
    )
    .await;
    register_unsupported(
        registry,
        "terminal",
        "UNSUPPORTED: interact with terminal.",
        json!({ "command": { "type": "string" } }),
        json!(["command"]),
    )
    .await;
    register_unsupported(
        registry,
        "task",
        "UNSUPPORTED: run a sub-agent task.",
        json!({
            "description": { "type": "string" },
            "prompt": { "type": "string" },
            "subagent_type": { "type": "string" },
            "session_id": { "type": "string" },
            "command": { "type": "string" },
        }),
        json!(["description", "prompt", "subagent_type"]),
    )
    .await;
    register_unsupported(registry, "todoread", "UNSUPPORTED: read todo list.", json!({}), json!([]))
        .await;
    register_unsupported(
        registry,
        "lsp",
        "UNSUPPORTED: LSP operations.",
        json!({
            "operation": { "type": "string" },
            "filePath": { "type": "string" },
            "line": { "type": "integer" },
            "character": { "type": "integer" },
        }),
        json!(["operation", "filePath", "line", "character"]),
    )
    .await;
    register_unsupported(
        registry,
        "batch",
        "UNSUPPORTED: batch tool calls.",
        json!({ "tool_calls": { "type": "array", "items": { "type": "object" } } }),
        json!(["tool_calls"]),
    )
    .await;
    register_unsupported(
        registry,
        "patch",
        "UNSUPPORTED: apply a multi-file patch.",
        json!({ "patchText": { "type": "string" } }),
        json!(["patchText"]),
    )
    .await;
    register_unsupported(
        registry,
        "multiedit",
        "UNSUPPORTED: apply multiple edits to a file.",
        json!({
            "filePath": { "type": "string" },
            "edits": { "type": "array", "items": { "type": "object" } },
        }),
        json!(["filePath", "edits"]),
    )
    .await;
}

// ---------------------------------------------------------------------------
// session-aware task-status inference

fn status_score(status: &str) -> i32 {
    match status {
        "completed" => 3,
        "in_progress" => 2,
        "pending" => 1,
        _ => 0,
    }
}

fn parse_todo_line(raw_line: &str) -> Option<(String, String)> {
    let line = raw_line.trim();
    if line.is_empty() {
        return None;
    }
    let lower = line.to_ascii_lowercase();
    for (prefix, status) in [
        ("- [ ]", "pending"),
        ("* [ ]", "pending"),
        ("- [x]", "completed"),
        ("* [x]", "completed"),
    ] {
        if lower.starts_with(prefix) {
            let text = line[prefix.len()..].trim();
            if text.is_empty() {
                return None;
            }
            return Some((text.to_string(), status.to_string()));
        }
    }
    if line.starts_with("- ") || line.starts_with("* ") {
        let text = line[2..].trim();
        if text.is_empty() {
            return None;
        }
        let status = if lower.contains("in progress") || lower.contains("in_progress") {
            "in_progress"
        } else if lower.contains("completed") || lower.contains("done") {
            "completed"
        } else if lower.contains("pending") {
            "pending"
        } else {
            "unknown"
        };
        return Some((text.to_string(), status.to_string()));
    }
    None
}

fn infer_todos(session: &crate::session::Session, max_history_messages: usize) -> Value {
    let mut best: HashMap<String, String> = HashMap::new();
    let start = session.history.len().saturating_sub(max_history_messages);
    for m in &session.history[start..] {
        if m.role != "assistant" && m.role != "user" {
            continue;
        }
        for line in m.content.lines() {
            let Some((text, status)) = parse_todo_line(line) else {
                continue;
            };
            let entry = best.entry(text).or_insert_with(|| status.clone());
            if status_score(&status) > status_score(entry) {
                *entry = status;
            }
        }
    }
    let mut todos: Vec<Value> = best
        .into_iter()
        .map(|(text, status)| json!({ "text": text, "status": status }))
        .collect();
    todos.sort_by(|a, b| a["text"].as_str().cmp(&b["text"].as_str()));
    Value::Array(todos)
}

fn recent_tool_results(session: &crate::session::Session, max_items: usize) -> Value {
    let mut out = Vec::new();
    for m in session.history.iter().rev() {
        if out.len() >= max_items {
            break;
        }
        if m.role != "user" {
            continue;
        }
        let Some(rest) = m.content.strip_prefix("TOOL_RESULT ") else {
            continue;
        };
        let Some((name, payload)) = rest.split_once(' ') else {
            continue;
        };
        let parsed: Result<Value, _> = serde_json::from_str(payload.trim());
        let (ok, result) = match parsed {
            Ok(v) => {
                let ok = v.get("ok").and_then(Value::as_bool).unwrap_or(true);
                (ok, v)
            }
            Err(_) => (true, json!(payload.trim())),
        };
        out.push(json!({ "name": name, "ok": ok, "result": result }));
    }
    Value::Array(out)
}

/// `runtime.infer_task_status` reads todo checkbox lines and recent
/// TOOL_RESULT messages out of a session's server-side history.
pub async fn register_session_tools(registry: &ToolRegistry, sessions: Arc<SessionManager>) {
    let schema = obj_schema(
        "runtime.infer_task_status",
        "Infer todo/task status from server session context.",
        json!({
            "session_id": { "type": "string" },
            "max_history_messages": { "type": "integer" },
            "max_recent_tool_results": { "type": "integer" },
        }),
        json!(["session_id"]),
    );
    registry
        .register_tool(
            schema,
            Arc::new(move |id: String, args: Value| {
                let sessions = sessions.clone();
                async move {
                    let Some(session_id) = args.get("session_id").and_then(Value::as_str) else {
                        return ToolResult::failure(
                            id,
                            "runtime.infer_task_status",
                            "missing required field: session_id",
                        );
                    };
                    let max_history = args
                        .get("max_history_messages")
                        .and_then(Value::as_u64)
                        .unwrap_or(200) as usize;
                    let max_results = args
                        .get("max_recent_tool_results")
                        .and_then(Value::as_u64)
                        .unwrap_or(20) as usize;
                    let session = sessions.get_or_create(session_id).await;
                    let mut result = json!({
                        "ok": true,
                        "session_id": session.session_id,
                        "history_messages": session.history.len(),
                        "turns": session.turns.len(),
                        "todos": infer_todos(&session, max_history),
                        "recent_tool_results": recent_tool_results(&session, max_results),
                    });
                    if let Some(last) = session.turns.last() {
                        result["last_turn_id"] = json!(last.turn_id);
                    }
                    ToolResult::success(id, "runtime.infer_task_status", result)
                }
                .boxed()
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;

    #[tokio::test]
    async fn unsupported_tools_refuse() {
        let registry = ToolRegistry::new();
        register_default_tools(&registry, "").await;
        for name in ["webfetch", "bash", "terminal", "task", "lsp", "batch", "patch", "multiedit", "todoread"] {
            let handler = registry.get_handler(name).await.unwrap();
            let r = handler("c1".into(), json!({})).await;
            assert!(!r.ok, "{} should refuse", name);
            assert_eq!(r.error, format!("{} is unsupported", name));
        }
    }

    #[tokio::test]
    async fn runtime_add_sums() {
        let registry = ToolRegistry::new();
        register_default_tools(&registry, "").await;
        let handler = registry.get_handler("runtime.add").await.unwrap();
        let r = handler("c1".into(), json!({ "a": 2, "b": 3 })).await;
        assert!(r.ok);
        assert_eq!(r.result["sum"], json!(5.0));
        let bad = handler("c2".into(), json!({ "a": "x", "b": 3 })).await;
        assert!(!bad.ok);
    }

    #[tokio::test]
    async fn runtime_echo_requires_text() {
        let registry = ToolRegistry::new();
        register_default_tools(&registry, "").await;
        let handler = registry.get_handler("runtime.echo").await.unwrap();
        let r = handler("c1".into(), json!({ "text": "hi" })).await;
        assert_eq!(r.result["text"], json!("hi"));
        let bad = handler("c2".into(), json!({})).await;
        assert_eq!(bad.error, "missing required field: text");
    }

    #[test]
    fn todo_line_parsing() {
        assert_eq!(
            parse_todo_line("- [ ] write tests"),
            Some(("write tests".into(), "pending".into()))
        );
        assert_eq!(
            parse_todo_line("* [x] ship it"),
            Some(("ship it".into(), "completed".into()))
        );
        assert_eq!(
            parse_todo_line("- refactor parser (in progress)"),
            Some(("refactor parser (in progress)".into(), "in_progress".into()))
        );
        assert_eq!(parse_todo_line("plain text"), None);
    }

    #[tokio::test]
    async fn infer_task_status_reads_history() {
        let registry = ToolRegistry::new();
        let sessions = Arc::new(SessionManager::in_memory());
        sessions
            .append_to_history(
                "s1",
                vec![
                    ChatMessage::new("assistant", "- [ ] collect data\n- [x] collect data"),
                    ChatMessage::new("user", r#"TOOL_RESULT read {"ok":true,"output":"x"}"#),
                ],
            )
            .await;
        register_session_tools(&registry, sessions).await;
        let handler = registry.get_handler("runtime.infer_task_status").await.unwrap();
        let r = handler("c1".into(), json!({ "session_id": "s1" })).await;
        assert!(r.ok);
        let todos = r.result["todos"].as_array().unwrap();
        assert_eq!(todos.len(), 1);
        assert_eq!(todos[0]["status"], json!("completed"));
        let results = r.result["recent_tool_results"].as_array().unwrap();
        assert_eq!(results[0]["name"], json!("read"));
    }
}

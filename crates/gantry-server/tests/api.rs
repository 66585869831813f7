//! End-to-end surface tests against the router with the scripted
//! `fake-tool` model and mocked upstreams.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use gantry::config::{HttpEndpoint, RuntimeConfig};
use gantry_server::{routes, AppState};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

async fn app_with_workspace(workspace: &TempDir) -> axum::Router {
    let mut config = RuntimeConfig::default();
    config.workspace_root = workspace.path().to_string_lossy().into_owned();
    let state = AppState::build(config).await;
    routes::configure(state)
}

fn post_json(path: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .unwrap();
    String::from_utf8_lossy(&bytes).into_owned()
}

#[tokio::test]
async fn health_reports_ok() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["ok"], json!(true));
    assert!(v["unix_seconds"].as_i64().unwrap() > 0);
}

#[tokio::test]
async fn api_prefix_auto_mounts_both() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    for path in ["/v1/models", "/api/v1/models"] {
        let response = app
            .clone()
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "{}", path);
    }
}

#[tokio::test]
async fn chat_with_tool_loop_reads_file() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("demo.txt"), "demo file content line\n").unwrap();
    let app = app_with_workspace(&workspace).await;

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "ide.read_file" }],
                "stream": false,
                "max_steps": 4,
                "max_tool_calls": 4,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-session-id"));
    let v = body_json(response).await;
    let content = v["choices"][0]["message"]["content"].as_str().unwrap();
    assert!(
        content.contains("demo file content line"),
        "content: {}",
        content
    );
    assert_eq!(v["choices"][0]["finish_reason"], json!("stop"));
}

#[tokio::test]
async fn chat_stream_emits_role_tool_calls_and_done() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("demo.txt"), "stream me\n").unwrap();
    let app = app_with_workspace(&workspace).await;

    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "ide.read_file" }],
                "stream": true,
                "max_steps": 4,
                "max_tool_calls": 4,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );
    let body = body_text(response).await;

    let mut finish_reasons = Vec::new();
    let mut saw_role = false;
    let mut saw_read_call = false;
    let mut saw_content = false;
    for line in body.lines() {
        let Some(data) = line.strip_prefix("data: ") else {
            continue;
        };
        if data == "[DONE]" {
            finish_reasons.push("done-marker".to_string());
            continue;
        }
        let v: Value = serde_json::from_str(data).unwrap();
        let choice = &v["choices"][0];
        if choice["delta"]["role"] == json!("assistant") {
            saw_role = true;
        }
        if choice["delta"]["tool_calls"][0]["function"]["name"] == json!("read") {
            saw_read_call = true;
        }
        if choice["delta"]["content"].is_string() {
            saw_content = true;
        }
        if let Some(reason) = choice["finish_reason"].as_str() {
            finish_reasons.push(reason.to_string());
        }
    }
    assert!(saw_role, "missing role delta: {}", body);
    assert!(saw_read_call, "missing read tool call: {}", body);
    assert!(saw_content, "missing content deltas: {}", body);
    assert_eq!(finish_reasons, vec!["stop", "done-marker"]);
    assert_eq!(body.matches("data: [DONE]").count(), 1);
}

#[tokio::test]
async fn unknown_provider_is_invalid_request() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "unknown:x",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let v = body_json(response).await;
    assert_eq!(v["error"]["type"], json!("invalid_request_error"));
    assert_eq!(v["error"]["message"], json!("unknown provider in model"));
    assert_eq!(v["error"]["param"], json!(null));
    assert_eq!(v["error"]["code"], json!(null));
}

#[tokio::test]
async fn client_managed_tools_return_tool_calls_verbatim() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "runtime.echo this" }],
                "stream": false,
                "tools": [{
                    "name": "runtime.echo",
                    "description": "",
                    "parameters": {
                        "type": "object",
                        "properties": { "text": { "type": "string" } },
                        "required": ["text"],
                    },
                }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["choices"][0]["finish_reason"], json!("tool_calls"));
    let call = &v["choices"][0]["message"]["tool_calls"][0];
    assert_eq!(call["function"]["name"], json!("runtime.echo"));
    let args: Value =
        serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args, json!({ "text": "hello" }));
}

#[tokio::test]
async fn embeddings_proxy_through_ollama() {
    let server = wiremock::MockServer::start().await;
    wiremock::Mock::given(wiremock::matchers::method("POST"))
        .and(wiremock::matchers::path("/api/embeddings"))
        .respond_with(
            wiremock::ResponseTemplate::new(200)
                .set_body_json(json!({ "embedding": [0.1, 0.2] })),
        )
        .mount(&server)
        .await;

    let workspace = TempDir::new().unwrap();
    let mut config = RuntimeConfig::default();
    config.workspace_root = workspace.path().to_string_lossy().into_owned();
    config.ollama = HttpEndpoint::parse(&server.uri(), 11434);
    let state = AppState::build(config).await;
    let app = routes::configure(state);

    let response = app
        .oneshot(post_json(
            "/v1/embeddings",
            json!({ "model": "ollama:all-minilm", "input": "hello" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["data"][0]["embedding"], json!([0.1, 0.2]));
}

#[tokio::test]
async fn session_id_is_echoed_and_history_accumulates() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .clone()
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "add the numbers" }],
                "session_id": "sess-fixed",
                "max_steps": 4,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-session-id").unwrap(),
        "sess-fixed"
    );
    // second turn sees the stored history without error
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "add the numbers" }],
                "session_id": "sess-fixed",
                "max_steps": 4,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn trace_header_carries_loop_state() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "add the numbers" }],
                "trace": true,
            }),
        ))
        .await
        .unwrap();
    let trace = response.headers().get("x-runtime-trace").unwrap();
    let v: Value = serde_json::from_str(trace.to_str().unwrap()).unwrap();
    assert_eq!(v["tool_calls"][0]["name"], json!("runtime.add"));
    assert_eq!(v["hit_step_limit"], json!(false));
}

#[tokio::test]
async fn anthropic_messages_basic() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            json!({
                "model": "fake-tool",
                "system": "be brief",
                "messages": [{ "role": "user", "content": "hello there" }],
                "max_tokens": 64,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["type"], json!("message"));
    assert_eq!(v["role"], json!("assistant"));
    assert!(v["content"][0]["text"].is_string());
    assert_eq!(v["stop_reason"], json!("end_turn"));
}

#[tokio::test]
async fn anthropic_stream_event_sequence() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "hello there" }],
                "stream": true,
            }),
        ))
        .await
        .unwrap();
    let body = body_text(response).await;
    let events: Vec<&str> = body
        .lines()
        .filter_map(|l| l.strip_prefix("event: "))
        .collect();
    assert_eq!(events.first(), Some(&"message_start"));
    assert_eq!(events.get(1), Some(&"content_block_start"));
    assert!(events.contains(&"content_block_delta"));
    assert_eq!(
        &events[events.len() - 3..],
        &["content_block_stop", "message_delta", "message_stop"]
    );
}

#[tokio::test]
async fn anthropic_error_envelope() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            json!({
                "model": "unknown:x",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let v = body_json(response).await;
    assert_eq!(v["type"], json!("error"));
    assert_eq!(v["error"]["type"], json!("invalid_request_error"));
}

#[tokio::test]
async fn responses_endpoint_single_shot() {
    let workspace = TempDir::new().unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/responses",
            json!({ "model": "fake-tool", "input": "say something" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let v = body_json(response).await;
    assert_eq!(v["object"], json!("response"));
    assert_eq!(v["output"][0]["role"], json!("assistant"));
    assert!(v["output"][0]["content"][0]["text"].is_string());
}

#[tokio::test]
async fn planner_mode_traces_plan() {
    let workspace = TempDir::new().unwrap();
    std::fs::write(workspace.path().join("demo.txt"), "planned read\n").unwrap();
    let app = app_with_workspace(&workspace).await;
    let response = app
        .oneshot(post_json(
            "/v1/chat/completions",
            json!({
                "model": "fake-tool",
                "messages": [{ "role": "user", "content": "read the demo file" }],
                "planner": true,
                "trace": true,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let trace = response.headers().get("x-runtime-trace").unwrap();
    let v: Value = serde_json::from_str(trace.to_str().unwrap()).unwrap();
    assert_eq!(v["used_planner"], json!(true));
    assert_eq!(v["plan_steps"], json!(1));
    assert_eq!(v["plan"][0]["name"], json!("read"));
}

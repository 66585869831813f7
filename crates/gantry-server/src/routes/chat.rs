//! `POST /v1/chat/completions`: the orchestrator entry point.
//!
//! Three dispatch modes: a direct provider call (no tools), a
//! client-managed single shot (tools with full schemas; tool calls are
//! handed back, arguments untouched), and the server-managed tool loop
//! (name-only tools plus any of max_steps / max_tool_calls / planner /
//! trace).

use super::errors::ApiError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use gantry::config::StreamGuards;
use gantry::logging::sanitize_json_for_log;
use gantry::new_id;
use gantry::orchestrator::stream::{NullEvents, SseWriter, StreamEvents};
use gantry::orchestrator::{
    build_tool_system_prompt, is_fake_model, ChatBackend, LoopOptions, LoopState, ToolLoopRun,
};
use gantry::parser::parse_tool_calls;
use gantry::request_scope;
use gantry::session::{ChatMessage, TurnRecord};
use gantry::tools::{ToolCall, ToolResult, ToolSchema};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const TEXT_CHUNK: usize = 64;
const TOOL_ARG_CHUNK: usize = 48;

// ---------------------------------------------------------------------------
// request parsing

/// Flatten message content to a single string; array/object content
/// parts contribute their `text` fields.
fn flatten_content(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        Value::Object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

fn parse_chat_messages(body: &Value) -> Option<Vec<ChatMessage>> {
    let messages = body.get("messages")?.as_array()?;
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        let Some(role) = m.get("role").and_then(Value::as_str) else {
            continue;
        };
        if role.is_empty() {
            continue;
        }
        let content = m.get("content").map(flatten_content).unwrap_or_default();
        out.push(ChatMessage::new(role, content));
    }
    Some(out)
}

#[derive(Debug, Clone)]
struct RequestedTool {
    name: String,
    description: String,
    parameters: Option<Value>,
}

impl RequestedTool {
    /// A client-managed tool carries a real parameter schema; a bare
    /// name (or empty object) is just a server-side tool reference.
    fn has_schema(&self) -> bool {
        self.parameters
            .as_ref()
            .and_then(Value::as_object)
            .map(|o| !o.is_empty())
            .unwrap_or(false)
    }

    fn to_schema(&self) -> ToolSchema {
        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: self.parameters.clone().unwrap_or_else(|| json!({})),
        }
    }
}

fn parse_requested_tools(body: &Value) -> Vec<RequestedTool> {
    let Some(tools) = body.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for t in tools {
        let spec = t.get("function").filter(|f| f.is_object()).unwrap_or(t);
        let Some(name) = spec.get("name").and_then(Value::as_str) else {
            continue;
        };
        if name.is_empty() {
            continue;
        }
        out.push(RequestedTool {
            name: name.to_string(),
            description: spec
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            parameters: spec.get("parameters").cloned(),
        });
    }
    out
}

fn tool_choice_is_none(body: &Value) -> bool {
    match body.get("tool_choice") {
        Some(Value::String(s)) => s == "none",
        Some(Value::Object(o)) => o.get("type").and_then(Value::as_str) == Some("none"),
        _ => false,
    }
}

fn parse_loop_options(body: &Value) -> (LoopOptions, bool) {
    let mut opts = LoopOptions::default();
    let mut any_set = false;
    if let Some(v) = body.get("max_steps").and_then(Value::as_i64) {
        opts.max_steps = v.max(0) as usize;
        any_set = true;
    }
    if let Some(v) = body.get("max_tool_calls").and_then(Value::as_i64) {
        opts.max_tool_calls = v.max(0) as usize;
        any_set = true;
    }
    match body.get("planner") {
        Some(Value::Bool(b)) => {
            opts.planner = *b;
            any_set = true;
        }
        Some(Value::Object(p)) => {
            any_set = true;
            opts.planner = p.get("enabled").and_then(Value::as_bool).unwrap_or(false);
            if let Some(v) = p.get("max_plan_steps").and_then(Value::as_i64) {
                opts.max_plan_steps = v.max(0) as usize;
            }
            if let Some(v) = p.get("max_rewrites").and_then(Value::as_i64) {
                opts.max_plan_rewrites = v.max(0) as usize;
            }
        }
        _ => {}
    }
    if body.get("trace").is_some() {
        any_set = true;
    }
    (opts, any_set)
}

// ---------------------------------------------------------------------------
// SSE emission

fn sse_headers(response: &mut Response, session_id: &str, turn_id: &str) {
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert(header::CONNECTION, "close".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    if let Ok(v) = session_id.parse() {
        headers.insert("x-session-id", v);
    }
    if let Ok(v) = turn_id.parse() {
        headers.insert("x-turn-id", v);
    }
}

fn sse_body(rx: mpsc::Receiver<String>) -> Body {
    let stream = ReceiverStream::new(rx).map(|s| Ok::<_, Infallible>(Bytes::from(s)));
    Body::from_stream(stream)
}

/// OpenAI chat-completions chunk writer with keep-alive discipline.
pub struct ChatChunkEmitter {
    writer: SseWriter,
    id: String,
    created: i64,
    model: String,
    wrote_role: bool,
    guards: StreamGuards,
    last_keepalive: std::time::Instant,
    last_progress: std::time::Instant,
}

impl ChatChunkEmitter {
    fn new(writer: SseWriter, model: &str, guards: StreamGuards) -> Self {
        let now = std::time::Instant::now();
        Self {
            writer,
            id: new_id("chatcmpl"),
            created: chrono::Utc::now().timestamp(),
            model: model.to_string(),
            wrote_role: false,
            guards,
            last_keepalive: now,
            last_progress: now,
        }
    }

    fn is_closed(&self) -> bool {
        self.writer.is_closed()
    }

    async fn chunk(&mut self, delta: Value, finish_reason: Value) -> bool {
        let payload = json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
        });
        self.writer.send(format!("data: {}\n\n", payload)).await
    }

    async fn role(&mut self) -> bool {
        if self.wrote_role {
            return !self.writer.is_closed();
        }
        self.wrote_role = true;
        self.chunk(json!({ "role": "assistant" }), Value::Null).await
    }

    async fn content_text(&mut self, text: &str) -> bool {
        self.role().await;
        let bytes = text.as_bytes();
        let mut off = 0;
        while off < bytes.len() {
            let mut end = (off + TEXT_CHUNK).min(bytes.len());
            while end < bytes.len() && !text.is_char_boundary(end) {
                end += 1;
            }
            if !self
                .chunk(json!({ "content": &text[off..end] }), Value::Null)
                .await
            {
                return false;
            }
            off = end;
        }
        true
    }

    async fn finish(&mut self, reason: &str, trace: Option<Value>) -> bool {
        self.role().await;
        let mut delta = json!({});
        if let Some(trace) = trace {
            delta["runtime_trace"] = trace;
        }
        self.chunk(delta, json!(reason)).await
    }

    async fn done(&mut self) -> bool {
        self.writer.send("data: [DONE]\n\n".to_string()).await
    }
}

#[async_trait]
impl StreamEvents for ChatChunkEmitter {
    async fn tool_call(&mut self, index: usize, call: &ToolCall) -> bool {
        self.role().await;
        let args = if call.arguments_json.is_empty() {
            "{}".to_string()
        } else {
            call.arguments_json.clone()
        };
        let bytes = args.as_bytes();
        let mut off = 0;
        let mut first = true;
        while off < bytes.len() {
            let mut end = (off + TOOL_ARG_CHUNK).min(bytes.len());
            while end < bytes.len() && !args.is_char_boundary(end) {
                end += 1;
            }
            let mut function = json!({ "arguments": &args[off..end] });
            if first {
                function["name"] = json!(call.name);
                first = false;
            }
            let delta = json!({
                "tool_calls": [{
                    "index": index,
                    "id": call.id,
                    "type": "function",
                    "function": function,
                }],
            });
            if !self.chunk(delta, Value::Null).await {
                return false;
            }
            off = end;
        }
        true
    }

    async fn tool_result(&mut self, result: &ToolResult) -> bool {
        let delta = json!({
            "tool_result": {
                "tool_call_id": result.tool_call_id,
                "name": result.name,
                "ok": result.ok,
                "result": result.result,
            },
        });
        self.chunk(delta, Value::Null).await
    }

    async fn tick(&mut self) -> bool {
        let now = std::time::Instant::now();
        if now.duration_since(self.last_keepalive) >= Duration::from_secs(1) {
            self.last_keepalive = now;
            if !self.writer.send(": keepalive\n\n".to_string()).await {
                return false;
            }
        }
        if now.duration_since(self.last_progress) >= Duration::from_millis(self.guards.progress_ms)
        {
            self.last_progress = now;
            let pad = ".".repeat(256);
            if !self.writer.send(format!(": progress {}\n\n", pad)).await {
                return false;
            }
        }
        !self.writer.is_closed()
    }
}

// ---------------------------------------------------------------------------
// persistence

async fn persist_turn(
    state: &AppState,
    session_id: &str,
    use_server_history: bool,
    mut turn: TurnRecord,
    loop_state: &LoopState,
) {
    turn.output_text = Some(loop_state.final_text.clone());
    let input_messages = turn.input_messages.clone();
    state.sessions.append_turn(session_id, turn).await;
    if !use_server_history {
        return;
    }
    let mut history = input_messages;
    for call in &loop_state.executed_calls {
        history.push(ChatMessage::new(
            "assistant",
            format!("TOOL_CALL {} {}", call.name, call.arguments_json),
        ));
    }
    for result in &loop_state.results {
        history.push(ChatMessage::new(
            "user",
            format!("TOOL_RESULT {} {}", result.name, result.result),
        ));
    }
    history.push(ChatMessage::new("assistant", loop_state.final_text.clone()));
    state.sessions.append_to_history(session_id, history).await;
}

fn completion_json(
    model: &str,
    final_text: &str,
    tool_calls: Option<&[ToolCall]>,
) -> Value {
    let mut message = json!({ "role": "assistant", "content": final_text });
    let mut finish_reason = "stop";
    if let Some(calls) = tool_calls {
        message["content"] = Value::Null;
        message["tool_calls"] = Value::Array(
            calls
                .iter()
                .map(|c| {
                    json!({
                        "id": c.id,
                        "type": "function",
                        "function": { "name": c.name, "arguments": c.arguments_json },
                    })
                })
                .collect(),
        );
        finish_reason = "tool_calls";
    }
    json!({
        "id": new_id("chatcmpl"),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "choices": [{ "index": 0, "message": message, "finish_reason": finish_reason }],
        "usage": { "prompt_tokens": null, "completion_tokens": null, "total_tokens": null },
    })
}

// ---------------------------------------------------------------------------
// the handler

pub async fn chat_completions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return ApiError::invalid_request("invalid json body").into_response();
    };
    tracing::debug!(body = %sanitize_json_for_log(&body), "chat request");

    let Some(model) = body.get("model").and_then(Value::as_str).map(str::to_string) else {
        return ApiError::invalid_request("missing field: model").into_response();
    };
    let Some(req_messages) = parse_chat_messages(&body) else {
        return ApiError::invalid_request("missing field: messages").into_response();
    };

    let preferred_sid = body
        .get("session_id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| {
            headers
                .get("x-session-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .unwrap_or_default();
    let session_id = state.sessions.ensure_session_id(&preferred_sid);

    let use_server_history = match body.get("use_server_history").and_then(Value::as_bool) {
        Some(flag) => flag,
        None => !req_messages
            .iter()
            .any(|m| m.role == "assistant" || m.role == "tool"),
    };

    let mut full_messages = Vec::new();
    if use_server_history {
        full_messages = state.sessions.get_or_create(&session_id).await.history;
    }
    full_messages.extend(req_messages.iter().cloned());

    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
    let (opts, knobs_set) = parse_loop_options(&body);
    let trace = body.get("trace").and_then(Value::as_bool).unwrap_or(false);
    let choice_none = tool_choice_is_none(&body);
    let requested = parse_requested_tools(&body);

    let mut backend = if is_fake_model(&model) {
        ChatBackend::fake()
    } else {
        let Some(resolved) = state.providers.resolve(&model) else {
            return ApiError::invalid_request("unknown provider in model").into_response();
        };
        state.providers.activate(&resolved.provider_name).await;
        ChatBackend::for_provider(resolved.provider, resolved.model)
    };
    backend.max_tokens = body.get("max_tokens").and_then(Value::as_i64);
    backend.temperature = body.get("temperature").and_then(Value::as_f64);
    backend.top_p = body.get("top_p").and_then(Value::as_f64);
    backend.min_p = body.get("min_p").and_then(Value::as_f64);

    let client_managed = !choice_none && requested.iter().any(RequestedTool::has_schema);
    let server_managed = !choice_none && !client_managed && knobs_set;
    let tools_in_play = client_managed || server_managed;
    if tools_in_play && model.to_ascii_lowercase().contains("glm") {
        backend.temperature = Some(0.7);
        backend.top_p = Some(1.0);
    }

    let turn = TurnRecord {
        turn_id: new_id("turn"),
        input_messages: req_messages,
        output_text: None,
    };

    if client_managed {
        let client_tools: Vec<ToolSchema> = requested.iter().map(RequestedTool::to_schema).collect();
        return run_client_managed(
            state, backend, model, full_messages, client_tools, stream, session_id, turn,
            use_server_history,
        )
        .await;
    }

    if server_managed {
        let names: Vec<String> = requested.iter().map(|t| t.name.clone()).collect();
        let allowed = state.tools.filter_schemas(&names).await;
        return run_server_managed(
            state, backend, model, full_messages, allowed, opts, stream, trace, session_id,
            turn, use_server_history,
        )
        .await;
    }

    run_direct(
        state, backend, model, full_messages, stream, session_id, turn, use_server_history,
    )
    .await
}

// ---------------------------------------------------------------------------
// direct mode

#[allow(clippy::too_many_arguments)]
async fn run_direct(
    state: Arc<AppState>,
    backend: ChatBackend,
    model: String,
    full_messages: Vec<ChatMessage>,
    stream: bool,
    session_id: String,
    turn: TurnRecord,
    use_server_history: bool,
) -> Response {
    if !stream {
        let final_text = match backend.chat_once_text(full_messages).await {
            Ok(t) => t,
            Err(e) => return ApiError::upstream(e.to_string()).into_response(),
        };
        let loop_state = LoopState {
            final_text: final_text.clone(),
            ..Default::default()
        };
        persist_turn(&state, &session_id, use_server_history, turn, &loop_state).await;
        let mut response = Json(completion_json(&model, &final_text, None)).into_response();
        if let Ok(v) = session_id.parse() {
            response.headers_mut().insert("x-session-id", v);
        }
        return response;
    }

    let (tx, rx) = mpsc::channel::<String>(64);
    let guards = state.config.stream.clone();
    let auth = request_scope::current_auth_headers();
    let sid = session_id.clone();
    let turn_id = turn.turn_id.clone();
    let model_for_chunks = model.clone();
    tokio::spawn(request_scope::with_auth_headers(auth, async move {
        let mut emitter = ChatChunkEmitter::new(SseWriter::new(tx), &model_for_chunks, guards.clone());
        emitter.role().await;

        let (dtx, mut drx) = mpsc::unbounded_channel::<String>();
        let gen_backend = backend.clone();
        let gen_messages = full_messages.clone();
        let gen_auth = request_scope::current_auth_headers();
        let generation = tokio::spawn(request_scope::with_auth_headers(gen_auth, async move {
            if gen_backend.provider.is_none() {
                let text = gantry::orchestrator::fake_model_once(&gen_messages);
                let _ = dtx.send(text);
                return Ok("stop".to_string());
            }
            let provider = gen_backend.provider.clone().expect("checked above");
            let req = gen_backend.request(gen_messages);
            provider.chat_stream(&req, dtx).await
        }));

        let mut acc = String::new();
        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(guards.model_timeout_s);
        loop {
            match tokio::time::timeout(Duration::from_millis(250), drx.recv()).await {
                Ok(Some(delta)) => {
                    acc.push_str(&delta);
                    emitter.content_text(&delta).await;
                }
                Ok(None) => break,
                Err(_) => {
                    emitter.tick().await;
                    if started.elapsed() >= deadline {
                        generation.abort();
                        let note = "model generation timed out";
                        emitter.content_text(note).await;
                        acc.push_str(note);
                        break;
                    }
                }
            }
        }
        let finish_reason = match generation.await {
            Ok(Ok(reason)) => reason,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "streaming generation failed");
                let note = format!("upstream error: {}", e);
                emitter.content_text(&note).await;
                acc.push_str(&note);
                "stop".to_string()
            }
            Err(_) => "stop".to_string(),
        };
        emitter.finish(&finish_reason, None).await;
        emitter.done().await;

        if !emitter.is_closed() {
            let loop_state = LoopState {
                final_text: acc,
                ..Default::default()
            };
            persist_turn(&state, &sid, use_server_history, turn, &loop_state).await;
        }
    }));

    let mut response = Response::new(sse_body(rx));
    *response.status_mut() = StatusCode::OK;
    sse_headers(&mut response, &session_id, &turn_id);
    response
}

// ---------------------------------------------------------------------------
// client-managed mode

#[allow(clippy::too_many_arguments)]
async fn run_client_managed(
    state: Arc<AppState>,
    backend: ChatBackend,
    model: String,
    full_messages: Vec<ChatMessage>,
    client_tools: Vec<ToolSchema>,
    stream: bool,
    session_id: String,
    turn: TurnRecord,
    use_server_history: bool,
) -> Response {
    let mut msgs = Vec::with_capacity(full_messages.len() + 1);
    msgs.push(ChatMessage::new(
        "system",
        build_tool_system_prompt(&client_tools),
    ));
    msgs.extend(full_messages);

    let text = match backend.chat_once_text(msgs).await {
        Ok(t) => t,
        Err(e) => return ApiError::upstream(e.to_string()).into_response(),
    };
    // client-managed mode forwards arguments verbatim; no repair
    let calls = parse_tool_calls(&text);
    let final_text = match &calls {
        Some(_) => String::new(),
        None => gantry::orchestrator::extract_final(&text).unwrap_or(text),
    };

    let turn_id = turn.turn_id.clone();
    let loop_state = LoopState {
        final_text: final_text.clone(),
        ..Default::default()
    };
    persist_turn(&state, &session_id, use_server_history, turn, &loop_state).await;

    if !stream {
        let mut response =
            Json(completion_json(&model, &final_text, calls.as_deref())).into_response();
        if let Ok(v) = session_id.parse() {
            response.headers_mut().insert("x-session-id", v);
        }
        return response;
    }

    let (tx, rx) = mpsc::channel::<String>(64);
    let guards = state.config.stream.clone();
    tokio::spawn(async move {
        let mut emitter = ChatChunkEmitter::new(SseWriter::new(tx), &model, guards);
        emitter.role().await;
        match calls {
            Some(calls) => {
                for (i, call) in calls.iter().enumerate() {
                    emitter.tool_call(i, call).await;
                }
                emitter.finish("tool_calls", None).await;
            }
            None => {
                emitter.content_text(&final_text).await;
                emitter.finish("stop", None).await;
            }
        }
        emitter.done().await;
    });

    let mut response = Response::new(sse_body(rx));
    *response.status_mut() = StatusCode::OK;
    sse_headers(&mut response, &session_id, &turn_id);
    response
}

// ---------------------------------------------------------------------------
// server-managed mode

#[allow(clippy::too_many_arguments)]
async fn run_server_managed(
    state: Arc<AppState>,
    backend: ChatBackend,
    model: String,
    full_messages: Vec<ChatMessage>,
    allowed: Vec<ToolSchema>,
    opts: LoopOptions,
    stream: bool,
    trace: bool,
    session_id: String,
    turn: TurnRecord,
    use_server_history: bool,
) -> Response {
    let guards = state.config.stream.clone();

    if !stream {
        let run = ToolLoopRun {
            backend,
            registry: &state.tools,
            messages: full_messages,
            allowed_tools: allowed,
            opts,
            guards,
        };
        let loop_state = run.run(&mut NullEvents).await;
        if let Some(e) = &loop_state.provider_error {
            if loop_state.final_text.is_empty() {
                return ApiError::upstream(e.clone()).into_response();
            }
        }
        persist_turn(&state, &session_id, use_server_history, turn, &loop_state).await;
        let mut response =
            Json(completion_json(&model, &loop_state.final_text, None)).into_response();
        let headers = response.headers_mut();
        if let Ok(v) = session_id.parse() {
            headers.insert("x-session-id", v);
        }
        if trace {
            if let Ok(v) = loop_state.trace_json().to_string().parse() {
                headers.insert("x-runtime-trace", v);
            }
        }
        return response;
    }

    let (tx, rx) = mpsc::channel::<String>(64);
    let auth = request_scope::current_auth_headers();
    let sid = session_id.clone();
    let turn_id = turn.turn_id.clone();
    let model_for_chunks = model.clone();
    tokio::spawn(request_scope::with_auth_headers(auth, async move {
        let mut emitter =
            ChatChunkEmitter::new(SseWriter::new(tx), &model_for_chunks, guards.clone());
        emitter.role().await;

        let run = ToolLoopRun {
            backend,
            registry: &state.tools,
            messages: full_messages,
            allowed_tools: allowed,
            opts,
            guards,
        };
        let loop_state = run.run(&mut emitter).await;

        emitter.content_text(&loop_state.final_text).await;
        let trace_json = trace.then(|| loop_state.trace_json());
        emitter.finish("stop", trace_json).await;
        emitter.done().await;

        if !loop_state.aborted && !emitter.is_closed() {
            persist_turn(&state, &sid, use_server_history, turn, &loop_state).await;
        }
    }));

    let mut response = Response::new(sse_body(rx));
    *response.status_mut() = StatusCode::OK;
    sse_headers(&mut response, &session_id, &turn_id);
    response
}

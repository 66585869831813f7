//! `POST /v1/messages`: the Anthropic-compatible chat surface.
//!
//! `system` and `messages` map onto the internal message list; streams
//! use the Anthropic event framing (`message_start`,
//! `content_block_start`, `content_block_delta`, `content_block_stop`,
//! `message_delta`, `message_stop`), each `data:` line preceded by its
//! `event:` name.

use super::errors::ApiError;
use crate::state::AppState;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures::StreamExt;
use gantry::new_id;
use gantry::orchestrator::{is_fake_model, ChatBackend};
use gantry::request_scope;
use gantry::session::ChatMessage;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

const TEXT_CHUNK: usize = 64;

fn flatten_anthropic_content(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn parse_messages(body: &Value) -> Option<Vec<ChatMessage>> {
    let mut out = Vec::new();
    if let Some(system) = body.get("system") {
        let text = flatten_anthropic_content(system);
        if !text.is_empty() {
            out.push(ChatMessage::new("system", text));
        }
    }
    let messages = body.get("messages")?.as_array()?;
    for m in messages {
        let Some(role) = m.get("role").and_then(Value::as_str) else {
            continue;
        };
        let content = m
            .get("content")
            .map(flatten_anthropic_content)
            .unwrap_or_default();
        out.push(ChatMessage::new(role, content));
    }
    Some(out)
}

fn stop_reason_for(finish_reason: &str) -> &'static str {
    match finish_reason {
        "length" => "max_tokens",
        _ => "end_turn",
    }
}

fn message_envelope(model: &str, text: &str, stop_reason: &str) -> Value {
    json!({
        "id": new_id("msg"),
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": [{ "type": "text", "text": text }],
        "stop_reason": stop_reason,
        "stop_sequence": null,
        "usage": { "input_tokens": null, "output_tokens": null },
    })
}

struct AnthropicEmitter {
    tx: mpsc::Sender<String>,
    closed: bool,
}

impl AnthropicEmitter {
    fn new(tx: mpsc::Sender<String>) -> Self {
        Self { tx, closed: false }
    }

    async fn event(&mut self, name: &str, data: Value) -> bool {
        if self.closed {
            return false;
        }
        let frame = format!("event: {}\ndata: {}\n\n", name, data);
        if self.tx.send(frame).await.is_err() {
            self.closed = true;
            return false;
        }
        true
    }

    async fn keepalive(&mut self) -> bool {
        if self.closed {
            return false;
        }
        if self.tx.send(": keepalive\n\n".to_string()).await.is_err() {
            self.closed = true;
            return false;
        }
        true
    }
}

pub async fn create_message(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Response {
    let Ok(Json(body)) = body else {
        return ApiError::invalid_request("invalid json body").into_anthropic_response();
    };
    let Some(model) = body.get("model").and_then(Value::as_str).map(str::to_string) else {
        return ApiError::invalid_request("missing field: model")
            .into_anthropic_response();
    };
    let Some(messages) = parse_messages(&body) else {
        return ApiError::invalid_request("missing field: messages").into_anthropic_response();
    };
    let stream = body.get("stream").and_then(Value::as_bool).unwrap_or(false);

    let mut backend = if is_fake_model(&model) {
        ChatBackend::fake()
    } else {
        let Some(resolved) = state.providers.resolve(&model) else {
            return ApiError::invalid_request("unknown provider in model")
                .into_anthropic_response();
        };
        state.providers.activate(&resolved.provider_name).await;
        ChatBackend::for_provider(resolved.provider, resolved.model)
    };
    backend.max_tokens = body.get("max_tokens").and_then(Value::as_i64);
    backend.temperature = body.get("temperature").and_then(Value::as_f64);
    backend.top_p = body.get("top_p").and_then(Value::as_f64);

    if !stream {
        let text = match backend.chat_once_text(messages).await {
            Ok(t) => t,
            Err(e) => return ApiError::upstream(e.to_string()).into_anthropic_response(),
        };
        return Json(message_envelope(&model, &text, "end_turn")).into_response();
    }

    let (tx, rx) = mpsc::channel::<String>(64);
    let auth = request_scope::current_auth_headers();
    let guards = state.config.stream.clone();
    tokio::spawn(request_scope::with_auth_headers(auth, async move {
        let mut emitter = AnthropicEmitter::new(tx);
        let mut skeleton = message_envelope(&model, "", "end_turn");
        skeleton["content"] = json!([]);
        skeleton["stop_reason"] = Value::Null;
        emitter
            .event("message_start", json!({ "type": "message_start", "message": skeleton }))
            .await;
        emitter
            .event(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": { "type": "text", "text": "" },
                }),
            )
            .await;

        let (dtx, mut drx) = mpsc::unbounded_channel::<String>();
        let gen_backend = backend.clone();
        let gen_messages = messages.clone();
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

        let mut buffered = String::new();
        let started = std::time::Instant::now();
        let deadline = Duration::from_secs(guards.model_timeout_s);
        loop {
            match tokio::time::timeout(Duration::from_millis(250), drx.recv()).await {
                Ok(Some(delta)) => buffered.push_str(&delta),
                Ok(None) => break,
                Err(_) => {
                    emitter.keepalive().await;
                    if started.elapsed() >= deadline {
                        generation.abort();
                        break;
                    }
                    continue;
                }
            }
            while buffered.len() >= TEXT_CHUNK {
                let mut end = TEXT_CHUNK;
                while end < buffered.len() && !buffered.is_char_boundary(end) {
                    end += 1;
                }
                let piece: String = buffered.drain(..end).collect();
                emitter
                    .event(
                        "content_block_delta",
                        json!({
                            "type": "content_block_delta",
                            "index": 0,
                            "delta": { "type": "text_delta", "text": piece },
                        }),
                    )
                    .await;
            }
        }
        if !buffered.is_empty() {
            emitter
                .event(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": 0,
                        "delta": { "type": "text_delta", "text": buffered },
                    }),
                )
                .await;
        }

        let finish_reason = match generation.await {
            Ok(Ok(reason)) => reason,
            _ => "stop".to_string(),
        };
        emitter
            .event(
                "content_block_stop",
                json!({ "type": "content_block_stop", "index": 0 }),
            )
            .await;
        emitter
            .event(
                "message_delta",
                json!({
                    "type": "message_delta",
                    "delta": { "stop_reason": stop_reason_for(&finish_reason), "stop_sequence": null },
                    "usage": { "output_tokens": null },
                }),
            )
            .await;
        emitter
            .event("message_stop", json!({ "type": "message_stop" }))
            .await;
    }));

    let stream_body =
        Body::from_stream(ReceiverStream::new(rx).map(|s| Ok::<_, Infallible>(Bytes::from(s))));
    let mut response = Response::new(stream_body);
    *response.status_mut() = StatusCode::OK;
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, "text/event-stream".parse().unwrap());
    headers.insert(header::CACHE_CONTROL, "no-cache".parse().unwrap());
    headers.insert(header::CONNECTION, "close".parse().unwrap());
    headers.insert("X-Accel-Buffering", "no".parse().unwrap());
    response
}

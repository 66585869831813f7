//! `POST /v1/responses`: single-shot wrapper over a one-user-message
//! chat, returning the OpenAI Responses envelope.

use super::errors::ApiError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use gantry::new_id;
use gantry::orchestrator::{fake_model_once, is_fake_model};
use gantry::providers::ChatRequest;
use gantry::session::ChatMessage;
use serde_json::{json, Value};
use std::sync::Arc;

fn parse_input(body: &Value) -> Option<String> {
    match body.get("input") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Array(items)) => {
            let first = items.first()?;
            if let Some(s) = first.as_str() {
                return Some(s.to_string());
            }
            first
                .get("content")
                .and_then(Value::as_str)
                .map(str::to_string)
        }
        _ => None,
    }
}

pub async fn create_response(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::invalid_request("invalid json body"))?;
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid_request("missing field: model"))?;
    let input =
        parse_input(&body).ok_or_else(|| ApiError::invalid_request("missing field: input"))?;

    let messages = vec![ChatMessage::new("user", input)];
    let content = if is_fake_model(model) {
        fake_model_once(&messages)
    } else {
        let resolved = state
            .providers
            .resolve(model)
            .ok_or_else(|| ApiError::invalid_request("unknown provider in model"))?;
        let req = ChatRequest {
            model: resolved.model.clone(),
            messages,
            ..Default::default()
        };
        resolved
            .provider
            .chat_once(&req)
            .await
            .map_err(|e| ApiError::upstream(e.to_string()))?
            .content
    };

    Ok(Json(json!({
        "id": new_id("resp"),
        "object": "response",
        "created": chrono::Utc::now().timestamp(),
        "model": model,
        "output": [{
            "id": new_id("msg"),
            "type": "message",
            "role": "assistant",
            "content": [{ "type": "output_text", "text": content }],
        }],
    })))
}

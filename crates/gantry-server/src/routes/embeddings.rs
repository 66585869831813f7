use super::errors::ApiError;
use crate::state::AppState;
use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

pub async fn create_embedding(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = body.map_err(|_| ApiError::invalid_request("invalid json body"))?;
    let model = body
        .get("model")
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::invalid_request("missing field: model"))?;
    let input = match body.get("input") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(a)) => a
            .first()
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| ApiError::invalid_request("missing field: input"))?,
        _ => return Err(ApiError::invalid_request("missing field: input")),
    };

    let resolved = state
        .providers
        .resolve(model)
        .ok_or_else(|| ApiError::invalid_request("unknown provider in model"))?;
    let embedding = resolved
        .provider
        .embeddings(&resolved.model, &input)
        .await
        .map_err(|e| ApiError::upstream(e.to_string()))?;

    Ok(Json(json!({
        "object": "list",
        "data": [{ "object": "embedding", "embedding": embedding, "index": 0 }],
        "model": model,
        "usage": { "prompt_tokens": null, "total_tokens": null },
    })))
}

use axum::Json;
use serde_json::{json, Value};

pub async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "unix_seconds": chrono::Utc::now().timestamp(),
    }))
}

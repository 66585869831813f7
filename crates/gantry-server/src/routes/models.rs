use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};
use std::sync::Arc;

/// Models across every registered provider. The default provider's
/// models keep their bare ids; other providers' ids are prefixed
/// `provider:model` so they resolve back to the right backend.
pub async fn list_models(State(state): State<Arc<AppState>>) -> Json<Value> {
    let default_provider = state.providers.default_provider_name().to_string();
    let created = chrono::Utc::now().timestamp();
    let mut data = Vec::new();
    for provider in state.providers.list() {
        let models = match provider.list_models().await {
            Ok(models) => models,
            Err(e) => {
                tracing::debug!(provider = provider.name(), error = %e, "list_models failed");
                continue;
            }
        };
        for m in models {
            let id = if provider.name() == default_provider {
                m.id.clone()
            } else {
                format!("{}:{}", provider.name(), m.id)
            };
            data.push(json!({
                "id": id,
                "object": "model",
                "created": created,
                "owned_by": if m.owned_by.is_empty() { provider.name().to_string() } else { m.owned_by },
            }));
        }
    }
    Json(json!({ "object": "list", "data": data }))
}

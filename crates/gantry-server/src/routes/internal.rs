use crate::state::AppState;
use axum::extract::State;
use axum::Json;
use serde_json::Value;
use std::sync::Arc;

/// Re-enumerate MCP tools and re-register their proxies.
pub async fn refresh_mcp_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    let summary = state.mcp.refresh_tools(&state.tools).await;
    Json(summary)
}

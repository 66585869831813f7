pub mod chat;
pub mod embeddings;
pub mod errors;
pub mod health;
pub mod internal;
pub mod messages;
pub mod models;
pub mod responses;

use crate::logging;
use crate::state::AppState;
use axum::routing::{get, post};
use axum::{middleware, Router};
use gantry::config::ApiPrefixMode;
use std::sync::Arc;

fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/models", get(models::list_models))
        .route("/v1/embeddings", post(embeddings::create_embedding))
        .route("/v1/chat/completions", post(chat::chat_completions))
        .route("/v1/responses", post(responses::create_response))
        .route("/v1/messages", post(messages::create_message))
        .route(
            "/internal/refresh_mcp_tools",
            post(internal::refresh_mcp_tools),
        )
        .route("/health", get(health::health))
        .with_state(state)
}

async fn not_found() -> errors::ApiError {
    errors::ApiError {
        status: axum::http::StatusCode::NOT_FOUND,
        kind: "invalid_request_error",
        message: "not found".to_string(),
    }
}

pub fn configure(state: Arc<AppState>) -> Router {
    let app = match state.config.api_prefix_mode {
        ApiPrefixMode::Auto => Router::new()
            .merge(api_routes(state.clone()))
            .nest("/api", api_routes(state)),
        ApiPrefixMode::V1 => api_routes(state),
        ApiPrefixMode::Api => Router::new().nest("/api", api_routes(state)),
    };

    app.fallback(not_found)
        .layer(middleware::from_fn(logging::auth_scope))
        .layer(middleware::from_fn(logging::request_log))
}

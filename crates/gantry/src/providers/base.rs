//! The capability contract every inference backend implements.

use super::errors::ProviderError;
use crate::session::ChatMessage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub owned_by: String,
}

#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub min_p: Option<f64>,
    /// GBNF grammar constraining generation; honored by backends that
    /// support constrained sampling, carried for the rest.
    pub grammar: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatResponse {
    pub model: String,
    pub content: String,
    pub done: bool,
    pub finish_reason: String,
}

/// A single textual delta from a streaming generation.
pub type DeltaSender = mpsc::UnboundedSender<String>;

/// Uniform contract for inference backends.
///
/// `start`/`stop` are the activation hooks the registry drives when the
/// active-provider slot changes hands; they must stay brief and limited
/// to local I/O since the registry holds its lock across them.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;

    async fn start(&self) {}
    async fn stop(&self) {}

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError>;

    async fn embeddings(&self, model: &str, input: &str) -> Result<Vec<f64>, ProviderError>;

    async fn chat_once(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError>;

    /// Stream a chat completion, sending one textual delta at a time and
    /// returning the finish reason (`"stop"` or `"length"`).
    async fn chat_stream(
        &self,
        req: &ChatRequest,
        deltas: DeltaSender,
    ) -> Result<String, ProviderError>;
}

/// Default streaming for HTTP adapters without a native token stream:
/// run the non-streaming call and replay the content in 64-char chunks
/// so the SSE contract holds.
pub async fn stream_via_chat_once<P: Provider + ?Sized>(
    provider: &P,
    req: &ChatRequest,
    deltas: DeltaSender,
) -> Result<String, ProviderError> {
    const CHUNK: usize = 64;
    let resp = provider.chat_once(req).await?;
    let bytes = resp.content.as_bytes();
    let mut off = 0;
    while off < bytes.len() {
        let mut end = (off + CHUNK).min(bytes.len());
        // keep UTF-8 boundaries intact
        while end < bytes.len() && !resp.content.is_char_boundary(end) {
            end += 1;
        }
        let _ = deltas.send(resp.content[off..end].to_string());
        off = end;
    }
    Ok(resp.finish_reason)
}

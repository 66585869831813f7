//! Ollama adapter over its native HTTP API.

use super::base::{stream_via_chat_once, ChatRequest, ChatResponse, DeltaSender, ModelInfo, Provider};
use super::errors::ProviderError;
use crate::config::HttpEndpoint;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;

pub struct OllamaProvider {
    client: Client,
    endpoint: HttpEndpoint,
    /// Model most recently sent upstream; `stop()` evicts it.
    last_model: Mutex<String>,
}

impl OllamaProvider {
    pub fn new(endpoint: HttpEndpoint) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            client,
            endpoint,
            last_model: Mutex::new(String::new()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url(), path)
    }

    fn remember_model(&self, model: &str) {
        if let Ok(mut last) = self.last_model.lock() {
            *last = model.to_string();
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
    }

    async fn start(&self) {
        match self.client.get(self.url("/api/ps")).send().await {
            Ok(res) => tracing::debug!(status = %res.status(), "ollama start probe"),
            Err(e) => tracing::debug!(error = %e, "ollama start probe failed"),
        }
    }

    /// Evict the last-used model so the activation switch frees VRAM
    /// before another backend loads.
    async fn stop(&self) {
        let model = match self.last_model.lock() {
            Ok(mut last) => std::mem::take(&mut *last),
            Err(_) => return,
        };
        if model.is_empty() {
            return;
        }
        let payload = json!({
            "model": model,
            "prompt": "",
            "stream": false,
            "keep_alive": 0,
        });
        match self
            .client
            .post(self.url("/api/generate"))
            .json(&payload)
            .send()
            .await
        {
            Ok(res) => tracing::info!(model, status = %res.status(), "ollama unload"),
            Err(e) => tracing::warn!(model, error = %e, "ollama unload failed"),
        }
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let res = self.client.get(self.url("/api/tags")).send().await?;
        if !res.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "ollama: /api/tags http {}",
                res.status().as_u16()
            )));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| ProviderError::RequestFailed("ollama: invalid json from /api/tags".into()))?;
        let mut out = Vec::new();
        if let Some(models) = body.get("models").and_then(Value::as_array) {
            for m in models {
                if let Some(name) = m.get("name").and_then(Value::as_str) {
                    out.push(ModelInfo {
                        id: name.to_string(),
                        owned_by: "ollama".to_string(),
                    });
                }
            }
        }
        Ok(out)
    }

    async fn embeddings(&self, model: &str, input: &str) -> Result<Vec<f64>, ProviderError> {
        self.remember_model(model);
        let payload = json!({ "model": model, "prompt": input });
        let res = self
            .client
            .post(self.url("/api/embeddings"))
            .json(&payload)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "ollama: /api/embeddings http {}",
                res.status().as_u16()
            )));
        }
        let body: Value = res.json().await.map_err(|_| {
            ProviderError::RequestFailed("ollama: invalid json from /api/embeddings".into())
        })?;
        let values = body
            .get("embedding")
            .and_then(Value::as_array)
            .ok_or_else(|| {
                ProviderError::RequestFailed("ollama: invalid json from /api/embeddings".into())
            })?;
        Ok(values.iter().filter_map(Value::as_f64).collect())
    }

    async fn chat_once(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        self.remember_model(&req.model);
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let payload = json!({
            "model": req.model,
            "stream": false,
            "messages": messages,
        });
        let res = self
            .client
            .post(self.url("/api/chat"))
            .json(&payload)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(ProviderError::RequestFailed(format!(
                "ollama: /api/chat http {}",
                res.status().as_u16()
            )));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| ProviderError::RequestFailed("ollama: invalid json from /api/chat".into()))?;
        let message = body
            .get("message")
            .and_then(Value::as_object)
            .ok_or_else(|| {
                ProviderError::RequestFailed("ollama: invalid json from /api/chat".into())
            })?;
        Ok(ChatResponse {
            model: req.model.clone(),
            content: message
                .get("content")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            done: body.get("done").and_then(Value::as_bool).unwrap_or(true),
            finish_reason: "stop".to_string(),
        })
    }

    async fn chat_stream(
        &self,
        req: &ChatRequest,
        deltas: DeltaSender,
    ) -> Result<String, ProviderError> {
        stream_via_chat_once(self, req, deltas).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChatMessage;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn provider_for(server: &MockServer) -> OllamaProvider {
        OllamaProvider::new(HttpEndpoint::parse(&server.uri(), 11434))
    }

    #[tokio::test]
    async fn list_models_reads_tags() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "models": [{"name": "qwen2.5:7b"}, {"name": "all-minilm"}]
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server).await;
        let models = provider.list_models().await.unwrap();
        assert_eq!(models.len(), 2);
        assert_eq!(models[0].id, "qwen2.5:7b");
        assert_eq!(models[0].owned_by, "ollama");
    }

    #[tokio::test]
    async fn embeddings_extracts_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/embeddings"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"embedding": [0.1, 0.2]})),
            )
            .mount(&server)
            .await;
        let provider = provider_for(&server).await;
        let vec = provider.embeddings("all-minilm", "hello").await.unwrap();
        assert_eq!(vec, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn chat_once_posts_non_streaming() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .and(body_partial_json(serde_json::json!({"stream": false})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": "hi there"},
                "done": true
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server).await;
        let req = ChatRequest {
            model: "qwen2.5".into(),
            messages: vec![ChatMessage::new("user", "hello")],
            ..Default::default()
        };
        let resp = provider.chat_once(&req).await.unwrap();
        assert_eq!(resp.content, "hi there");
        assert!(resp.done);
    }

    #[tokio::test]
    async fn chat_stream_chunks_at_64_chars() {
        let server = MockServer::start().await;
        let long = "x".repeat(130);
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": long},
                "done": true
            })))
            .mount(&server)
            .await;
        let provider = provider_for(&server).await;
        let req = ChatRequest {
            model: "qwen2.5".into(),
            messages: vec![ChatMessage::new("user", "hello")],
            ..Default::default()
        };
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let finish = provider.chat_stream(&req, tx).await.unwrap();
        assert_eq!(finish, "stop");
        let mut chunks = Vec::new();
        while let Ok(c) = rx.try_recv() {
            chunks.push(c);
        }
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 64);
        assert_eq!(chunks[2].len(), 2);
    }

    #[tokio::test]
    async fn stop_evicts_last_model() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/chat"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message": {"content": "ok"}, "done": true
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(
                serde_json::json!({"model": "qwen2.5", "keep_alive": 0}),
            ))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .expect(1)
            .mount(&server)
            .await;
        let provider = provider_for(&server).await;
        let req = ChatRequest {
            model: "qwen2.5".into(),
            messages: vec![ChatMessage::new("user", "hello")],
            ..Default::default()
        };
        provider.chat_once(&req).await.unwrap();
        provider.stop().await;
    }
}

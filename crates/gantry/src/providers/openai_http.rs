//! Generic adapter for OpenAI-compatible HTTP endpoints (MNN, LMDeploy,
//! and anything else speaking `/v1/*`).
//!
//! Caller credentials are read from the per-request auth scope when the
//! outgoing request is built, never captured at construction time.

use super::base::{stream_via_chat_once, ChatRequest, ChatResponse, DeltaSender, ModelInfo, Provider};
use super::errors::ProviderError;
use crate::config::HttpEndpoint;
use crate::request_scope;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

pub struct OpenAiHttpProvider {
    name: String,
    client: Client,
    endpoint: HttpEndpoint,
}

impl OpenAiHttpProvider {
    pub fn new(name: impl Into<String>, endpoint: HttpEndpoint) -> Self {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(300))
            .build()
            .unwrap_or_default();
        Self {
            name: name.into(),
            client,
            endpoint,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.base_url(), path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(self.url(path));
        for (k, v) in request_scope::current_auth_headers() {
            builder = builder.header(k, v);
        }
        builder
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(self.url(path));
        for (k, v) in request_scope::current_auth_headers() {
            builder = builder.header(k, v);
        }
        builder
    }

    fn bad_json(&self, path: &str) -> ProviderError {
        ProviderError::RequestFailed(format!("{}: invalid json from {}", self.name, path))
    }

    fn http_error(&self, path: &str, status: u16) -> ProviderError {
        ProviderError::RequestFailed(format!("{}: {} http {}", self.name, path, status))
    }
}

#[async_trait]
impl Provider for OpenAiHttpProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>, ProviderError> {
        let res = self.get("/v1/models").send().await?;
        if !res.status().is_success() {
            return Err(self.http_error("/v1/models", res.status().as_u16()));
        }
        let body: Value = res.json().await.map_err(|_| self.bad_json("/v1/models"))?;
        let data = body
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| self.bad_json("/v1/models"))?;
        let mut out = Vec::new();
        for item in data {
            let Some(id) = item.get("id").and_then(Value::as_str) else {
                continue;
            };
            let owned_by = item
                .get("owned_by")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or(&self.name);
            out.push(ModelInfo {
                id: id.to_string(),
                owned_by: owned_by.to_string(),
            });
        }
        Ok(out)
    }

    async fn embeddings(&self, model: &str, input: &str) -> Result<Vec<f64>, ProviderError> {
        let payload = json!({ "model": model, "input": input });
        let res = self.post("/v1/embeddings").json(&payload).send().await?;
        if !res.status().is_success() {
            return Err(self.http_error("/v1/embeddings", res.status().as_u16()));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| self.bad_json("/v1/embeddings"))?;
        let values = body
            .get("data")
            .and_then(Value::as_array)
            .and_then(|d| d.first())
            .and_then(|d| d.get("embedding"))
            .and_then(Value::as_array)
            .ok_or_else(|| self.bad_json("/v1/embeddings"))?;
        Ok(values.iter().filter_map(Value::as_f64).collect())
    }

    async fn chat_once(&self, req: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let messages: Vec<Value> = req
            .messages
            .iter()
            .map(|m| json!({ "role": m.role, "content": m.content }))
            .collect();
        let mut payload = json!({
            "model": req.model,
            "stream": false,
            "messages": messages,
        });
        if let Some(max_tokens) = req.max_tokens.filter(|v| *v > 0) {
            payload["max_tokens"] = json!(max_tokens);
        }
        if let Some(t) = req.temperature {
            payload["temperature"] = json!(t);
        }
        if let Some(p) = req.top_p {
            payload["top_p"] = json!(p);
        }
        if let Some(p) = req.min_p {
            payload["min_p"] = json!(p);
        }

        let res = self
            .post("/v1/chat/completions")
            .json(&payload)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(self.http_error("/v1/chat/completions", res.status().as_u16()));
        }
        let body: Value = res
            .json()
            .await
            .map_err(|_| self.bad_json("/v1/chat/completions"))?;
        let choice = body
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
            .ok_or_else(|| self.bad_json("/v1/chat/completions"))?;
        let content = choice
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_str)
            .ok_or_else(|| self.bad_json("/v1/chat/completions"))?;
        let finish_reason = choice
            .get("finish_reason")
            .and_then(Value::as_str)
            .unwrap_or("stop");
        Ok(ChatResponse {
            model: req.model.clone(),
            content: content.to_string(),
            done: true,
            finish_reason: finish_reason.to_string(),
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
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn chat_once_parses_choice() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "choices": [{"message": {"content": "pong"}, "finish_reason": "stop"}]
            })))
            .mount(&server)
            .await;
        let provider = OpenAiHttpProvider::new("mnn", HttpEndpoint::parse(&server.uri(), 8000));
        let req = ChatRequest {
            model: "m".into(),
            messages: vec![ChatMessage::new("user", "ping")],
            ..Default::default()
        };
        let resp = provider.chat_once(&req).await.unwrap();
        assert_eq!(resp.content, "pong");
        assert_eq!(resp.finish_reason, "stop");
    }

    #[tokio::test]
    async fn forwards_auth_scope_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .and(header("authorization", "Bearer caller-token"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"data": [{"id": "m1"}]})),
            )
            .expect(1)
            .mount(&server)
            .await;
        let provider = OpenAiHttpProvider::new("lmdeploy", HttpEndpoint::parse(&server.uri(), 8000));
        let models = crate::request_scope::with_auth_headers(
            vec![("authorization".into(), "Bearer caller-token".into())],
            provider.list_models(),
        )
        .await
        .unwrap();
        assert_eq!(models[0].id, "m1");
        assert_eq!(models[0].owned_by, "lmdeploy");
    }

    #[tokio::test]
    async fn upstream_error_maps_to_request_failed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let provider = OpenAiHttpProvider::new("mnn", HttpEndpoint::parse(&server.uri(), 8000));
        let err = provider.embeddings("m", "x").await.unwrap_err();
        assert!(matches!(err, ProviderError::RequestFailed(_)));
    }
}

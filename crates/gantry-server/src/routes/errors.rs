//! Error envelopes for both API dialects.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub kind: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            kind: "invalid_request_error",
            message: message.into(),
        }
    }

    pub fn upstream(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: StatusCode::BAD_GATEWAY,
            kind: "api_error",
            message: if message.is_empty() {
                "upstream error".to_string()
            } else {
                message
            },
        }
    }

    pub fn server(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            kind: "server_error",
            message: message.into(),
        }
    }

    /// The Anthropic-dialect rendering of the same failure.
    pub fn into_anthropic_response(self) -> Response {
        let body = json!({
            "type": "error",
            "error": { "type": self.kind, "message": self.message },
        });
        (self.status, Json(body)).into_response()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "message": self.message,
                "type": self.kind,
                "param": null,
                "code": null,
            },
        });
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn openai_envelope_shape() {
        let err = ApiError::invalid_request("missing field: model");
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.kind, "invalid_request_error");
    }

    #[test]
    fn upstream_default_message() {
        let err = ApiError::upstream("");
        assert_eq!(err.message, "upstream error");
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
    }
}

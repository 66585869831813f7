//! Tracing setup, request logging with credential redaction, and the
//! middleware that binds caller auth headers into the per-request scope.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use tracing_subscriber::EnvFilter;

pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

const AUTH_HEADER_NAMES: &[&str] = &["authorization", "x-api-key", "api-key", "api_key"];

fn is_sensitive_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    AUTH_HEADER_NAMES.contains(&name.as_str()) || name == "proxy-authorization" || name == "cookie"
}

/// Pull the upstream-auth headers out of the incoming request, in the
/// order clients commonly send them.
pub fn extract_auth_headers(headers: &axum::http::HeaderMap) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for name in AUTH_HEADER_NAMES {
        if let Some(value) = headers.get(*name).and_then(|v| v.to_str().ok()) {
            out.push((name.to_string(), value.to_string()));
        }
    }
    out
}

/// Bind the caller's auth headers for the whole request future so any
/// adapter issuing HTTP on its behalf observes them.
pub async fn auth_scope(request: Request, next: Next) -> Response {
    let headers = extract_auth_headers(request.headers());
    gantry::request_scope::with_auth_headers(headers, next.run(request)).await
}

/// Log method, path, and headers with credentials redacted.
pub async fn request_log(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let mut shown = Vec::new();
    for (name, value) in request.headers() {
        if is_sensitive_header(name.as_str()) {
            shown.push(format!("{}=<redacted>", name));
        } else {
            shown.push(format!("{}={}", name, value.to_str().unwrap_or("<bin>")));
        }
    }
    tracing::info!(%method, %path, headers = %shown.join(" "), "request");
    let response = next.run(request).await;
    tracing::info!(%method, %path, status = %response.status(), "response");
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue};

    #[test]
    fn auth_headers_extracted_in_order() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", HeaderValue::from_static("k1"));
        headers.insert("authorization", HeaderValue::from_static("Bearer t"));
        let out = extract_auth_headers(&headers);
        assert_eq!(
            out,
            vec![
                ("authorization".to_string(), "Bearer t".to_string()),
                ("x-api-key".to_string(), "k1".to_string()),
            ]
        );
    }

    #[test]
    fn sensitive_headers_detected() {
        assert!(is_sensitive_header("Authorization"));
        assert!(is_sensitive_header("api_key"));
        assert!(!is_sensitive_header("content-type"));
    }
}

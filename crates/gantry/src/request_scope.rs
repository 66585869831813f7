//! Task-local storage for the auth headers of the request being served.
//!
//! Upstream adapters must observe the credentials the caller sent with the
//! current request, not whatever was around when the adapter was built.
//! The headers are bound once by server middleware and read back at
//! request-construction time by any adapter that issues HTTP on the
//! caller's behalf.

use tokio::task_local;

task_local! {
    pub static AUTH_HEADERS: Vec<(String, String)>;
}

/// Run `f` with the given auth headers bound for its whole future.
pub async fn with_auth_headers<F>(headers: Vec<(String, String)>, f: F) -> F::Output
where
    F: std::future::Future,
{
    AUTH_HEADERS.scope(headers, f).await
}

/// Auth headers of the current request, empty when none were bound.
pub fn current_auth_headers() -> Vec<(String, String)> {
    AUTH_HEADERS.try_with(|h| h.clone()).unwrap_or_default()
}

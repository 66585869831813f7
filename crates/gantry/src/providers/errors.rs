use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Unknown model: {0}")]
    UnknownModel(String),

    #[error("Unsupported operation: {0}")]
    NotImplemented(String),
}

fn is_network_error(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout() || (err.status().is_none() && err.is_request())
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if is_network_error(&error) {
            let msg = if error.is_timeout() {
                "request timed out".to_string()
            } else if let Some(url) = error.url() {
                match url.host_str() {
                    Some(host) => format!("could not connect to {}", host),
                    None => "could not connect to upstream".to_string(),
                }
            } else {
                "could not connect to upstream".to_string()
            };
            return ProviderError::Network(msg);
        }
        match error.status() {
            Some(status) => ProviderError::RequestFailed(format!("{} (status: {})", error, status)),
            None => ProviderError::RequestFailed(error.to_string()),
        }
    }
}

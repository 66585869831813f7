//! Environment-driven runtime configuration.

use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpEndpoint {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub base_path: String,
}

impl Default for HttpEndpoint {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "127.0.0.1".to_string(),
            port: 11434,
            base_path: String::new(),
        }
    }
}

impl HttpEndpoint {
    /// Parse `[scheme://]host[:port][/base/path]`, filling in `default_port`
    /// when the port is absent. Accepts the bare `host:port` form Ollama
    /// users commonly export.
    pub fn parse(raw: &str, default_port: u16) -> Self {
        let mut ep = HttpEndpoint {
            port: 0,
            ..Default::default()
        };
        let mut s = raw.trim().to_string();
        if let Some(rest) = s.strip_prefix("https://") {
            ep.scheme = "https".to_string();
            s = rest.to_string();
        } else if let Some(rest) = s.strip_prefix("http://") {
            ep.scheme = "http".to_string();
            s = rest.to_string();
        }
        if let Some(slash) = s.find('/') {
            ep.base_path = s[slash..].trim_end_matches('/').to_string();
            s.truncate(slash);
        }
        if let Some(colon) = s.rfind(':') {
            ep.host = s[..colon].to_string();
            ep.port = s[colon + 1..].parse().unwrap_or(0);
        } else if !s.is_empty() {
            ep.host = s;
        }
        if ep.port == 0 {
            ep.port = default_port;
        }
        if ep.host.is_empty() {
            ep.host = "127.0.0.1".to_string();
        }
        ep
    }

    pub fn base_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.scheme, self.host, self.port, self.base_path
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPrefixMode {
    /// Mount the surface at both `""` and `"/api"`.
    Auto,
    V1,
    Api,
}

#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    pub store_type: String,
    pub file_path: String,
    pub endpoint: HttpEndpoint,
    pub password: String,
    pub db: i64,
    pub namespace: String,
    pub reset_on_boot: bool,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            store_type: "memory".to_string(),
            file_path: String::new(),
            endpoint: HttpEndpoint::default(),
            password: String::new(),
            db: 0,
            namespace: String::new(),
            reset_on_boot: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StreamGuards {
    pub model_timeout_s: u64,
    pub tool_timeout_s: u64,
    pub progress_ms: u64,
}

impl Default for StreamGuards {
    fn default() -> Self {
        Self {
            model_timeout_s: 900,
            tool_timeout_s: 300,
            progress_ms: 2000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct McpConfig {
    pub hosts: Vec<HttpEndpoint>,
    pub connect_timeout_s: u64,
    pub read_timeout_s: u64,
    pub write_timeout_s: u64,
    pub max_in_flight: usize,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            hosts: Vec::new(),
            connect_timeout_s: 5,
            read_timeout_s: 60,
            write_timeout_s: 30,
            max_in_flight: 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub listen_host: String,
    pub listen_port: u16,
    pub default_provider: String,
    pub llama_cpp_model_path: String,
    pub session_store: SessionStoreConfig,
    pub ollama: HttpEndpoint,
    pub mnn: Option<HttpEndpoint>,
    pub lmdeploy: Option<HttpEndpoint>,
    pub mcp: McpConfig,
    pub workspace_root: String,
    pub api_prefix_mode: ApiPrefixMode,
    pub stream: StreamGuards,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            listen_host: "0.0.0.0".to_string(),
            listen_port: 8080,
            default_provider: "llama_cpp".to_string(),
            llama_cpp_model_path: String::new(),
            session_store: SessionStoreConfig::default(),
            ollama: HttpEndpoint::default(),
            mnn: None,
            lmdeploy: None,
            mcp: McpConfig::default(),
            workspace_root: String::new(),
            api_prefix_mode: ApiPrefixMode::Auto,
            stream: StreamGuards::default(),
        }
    }
}

fn env_str(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_u64(name: &str) -> Option<u64> {
    env_str(name).and_then(|v| v.trim().parse().ok())
}

pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" | "on" => Some(true),
        "0" | "false" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

impl RuntimeConfig {
    pub fn from_env() -> Self {
        let mut cfg = RuntimeConfig::default();

        if let Some(host) = env_str("RUNTIME_LISTEN_HOST") {
            cfg.listen_host = host;
        }
        if let Some(port) = env_str("RUNTIME_LISTEN_PORT").and_then(|v| v.parse().ok()) {
            cfg.listen_port = port;
        }
        if let Some(p) = env_str("RUNTIME_PROVIDER") {
            cfg.default_provider = p;
        }
        if let Some(model) = env_str("LLAMA_CPP_MODEL") {
            cfg.llama_cpp_model_path = model;
        }

        let store = &mut cfg.session_store;
        if let Some(path) = env_str("RUNTIME_SESSION_STORE").or_else(|| env_str("RUNTIME_SESSION_STORE_PATH")) {
            store.file_path = path;
        }
        let mut type_explicit = false;
        if let Some(t) = env_str("RUNTIME_SESSION_STORE_TYPE") {
            store.store_type = t.to_ascii_lowercase();
            type_explicit = true;
        }
        if !type_explicit && !store.file_path.is_empty() {
            store.store_type = "file".to_string();
        }
        if let Some(ep) = env_str("RUNTIME_SESSION_STORE_ENDPOINT") {
            store.endpoint = HttpEndpoint::parse(&ep, 6379);
        } else if store.store_type == "minimemory" || store.store_type == "redis" {
            store.endpoint = HttpEndpoint::parse("127.0.0.1:6379", 6379);
        }
        if let Some(pw) = env_str("RUNTIME_SESSION_STORE_PASSWORD") {
            store.password = pw;
        }
        if let Some(db) = env_str("RUNTIME_SESSION_STORE_DB").and_then(|v| v.parse().ok()) {
            store.db = db;
        }
        if let Some(ns) = env_str("RUNTIME_SESSION_STORE_NAMESPACE") {
            store.namespace = ns;
        }
        if let Some(b) = env_str("RUNTIME_SESSION_STORE_RESET_ON_BOOT").and_then(|v| parse_bool(&v)) {
            store.reset_on_boot = b;
        }

        if let Some(raw) = env_str("OLLAMA_HOST") {
            cfg.ollama = HttpEndpoint::parse(&raw, 11434);
        }
        if let Some(raw) = env_str("MNN_HOST") {
            cfg.mnn = Some(HttpEndpoint::parse(&raw, 8000));
        }
        if let Some(raw) = env_str("LMDEPLOY_HOST") {
            cfg.lmdeploy = Some(HttpEndpoint::parse(&raw, 23333));
        }

        if let Some(raw) = env_str("MCP_HOST") {
            cfg.mcp.hosts = vec![HttpEndpoint::parse(&raw, 9000)];
        }
        if let Some(raw) = env_str("MCP_HOSTS") {
            cfg.mcp.hosts = split_csv(&raw)
                .iter()
                .map(|u| HttpEndpoint::parse(u, 9000))
                .collect();
        }
        if let Some(v) = env_u64("MCP_CONNECT_TIMEOUT_S") {
            cfg.mcp.connect_timeout_s = v;
        }
        if let Some(v) = env_u64("MCP_READ_TIMEOUT_S") {
            cfg.mcp.read_timeout_s = v;
        }
        if let Some(v) = env_u64("MCP_WRITE_TIMEOUT_S") {
            cfg.mcp.write_timeout_s = v;
        }
        if let Some(v) = env_u64("MCP_MAX_IN_FLIGHT") {
            if v > 0 {
                cfg.mcp.max_in_flight = v as usize;
            }
        }

        if let Some(root) = env_str("RUNTIME_WORKSPACE_ROOT") {
            cfg.workspace_root = root;
        }
        if let Some(mode) = env_str("RUNTIME_API_PREFIX_MODE") {
            cfg.api_prefix_mode = match mode.to_ascii_lowercase().as_str() {
                "v1" => ApiPrefixMode::V1,
                "api" => ApiPrefixMode::Api,
                _ => ApiPrefixMode::Auto,
            };
        }

        if let Some(v) = env_u64("RUNTIME_STREAM_MODEL_TIMEOUT_S") {
            cfg.stream.model_timeout_s = v;
        }
        if let Some(v) = env_u64("RUNTIME_STREAM_TOOL_TIMEOUT_S") {
            cfg.stream.tool_timeout_s = v;
        }
        if let Some(v) = env_u64("RUNTIME_STREAM_PROGRESS_MS") {
            cfg.stream.progress_ms = v;
        }

        cfg
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_parse_scheme_port_path() {
        let ep = HttpEndpoint::parse("https://inference.local:9443/v1/base/", 11434);
        assert_eq!(ep.scheme, "https");
        assert_eq!(ep.host, "inference.local");
        assert_eq!(ep.port, 9443);
        assert_eq!(ep.base_path, "/v1/base");
    }

    #[test]
    fn endpoint_parse_bare_host_uses_default_port() {
        let ep = HttpEndpoint::parse("ollama-box", 11434);
        assert_eq!(ep.host, "ollama-box");
        assert_eq!(ep.port, 11434);
        assert_eq!(ep.scheme, "http");
        assert!(ep.base_path.is_empty());
    }

    #[test]
    fn endpoint_parse_host_port() {
        let ep = HttpEndpoint::parse("10.0.0.5:8000", 11434);
        assert_eq!(ep.host, "10.0.0.5");
        assert_eq!(ep.port, 8000);
    }

    #[test]
    fn parse_bool_forms() {
        assert_eq!(parse_bool("ON"), Some(true));
        assert_eq!(parse_bool("no"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.listen_host, "0.0.0.0");
        assert_eq!(cfg.listen_port, 8080);
        assert_eq!(cfg.default_provider, "llama_cpp");
        assert_eq!(cfg.stream.model_timeout_s, 900);
        assert_eq!(cfg.stream.tool_timeout_s, 300);
        assert_eq!(cfg.stream.progress_ms, 2000);
        assert_eq!(cfg.mcp.max_in_flight, 4);
    }
}

use gantry::config::RuntimeConfig;
use gantry::mcp::bridge::{register_ide_tools, McpBridge};
use gantry::providers::llama_cpp::LlamaCppProvider;
use gantry::providers::ollama::OllamaProvider;
use gantry::providers::openai_http::OpenAiHttpProvider;
use gantry::providers::ProviderRegistry;
use gantry::session::{store::build_store, SessionManager};
use gantry::tools::builtin::{register_default_tools, register_session_tools};
use gantry::tools::ToolRegistry;
use std::sync::Arc;

pub struct AppState {
    pub config: RuntimeConfig,
    pub providers: Arc<ProviderRegistry>,
    pub sessions: Arc<SessionManager>,
    pub tools: Arc<ToolRegistry>,
    pub mcp: Arc<McpBridge>,
}

impl AppState {
    pub async fn build(config: RuntimeConfig) -> Arc<Self> {
        let sessions = Arc::new(SessionManager::new(build_store(&config.session_store)));

        let mut providers = ProviderRegistry::new(config.default_provider.clone());
        providers.register(Arc::new(LlamaCppProvider::new(
            config.llama_cpp_model_path.clone(),
        )));
        providers.register(Arc::new(OllamaProvider::new(config.ollama.clone())));
        if let Some(endpoint) = &config.mnn {
            providers.register(Arc::new(OpenAiHttpProvider::new("mnn", endpoint.clone())));
        }
        if let Some(endpoint) = &config.lmdeploy {
            providers.register(Arc::new(OpenAiHttpProvider::new(
                "lmdeploy",
                endpoint.clone(),
            )));
        }

        let tools = Arc::new(ToolRegistry::new());
        register_default_tools(&tools, &config.workspace_root).await;
        register_session_tools(&tools, sessions.clone()).await;

        let mcp = Arc::new(McpBridge::connect(&config.mcp, &config.workspace_root).await);
        if mcp.server_count() > 0 {
            let summary = mcp.refresh_tools(&tools).await;
            tracing::info!(summary = %summary, "mcp tools registered");
            register_ide_tools(&mcp, &tools).await;
        }

        Arc::new(Self {
            config,
            providers: Arc::new(providers),
            sessions,
            tools,
            mcp,
        })
    }
}

use anyhow::Result;
use clap::Parser;
use gantry::config::RuntimeConfig;
use gantry_server::{logging, routes, AppState};
use tracing::info;

/// OpenAI/Anthropic-compatible gateway over local inference backends.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Override RUNTIME_LISTEN_HOST
    #[arg(long)]
    host: Option<String>,

    /// Override RUNTIME_LISTEN_PORT
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::setup_logging();
    let cli = Cli::parse();

    let mut config = RuntimeConfig::from_env();
    if let Some(host) = cli.host {
        config.listen_host = host;
    }
    if let Some(port) = cli.port {
        config.listen_port = port;
    }

    info!(
        default_provider = %config.default_provider,
        workspace_root = %config.workspace_root,
        "starting gantry"
    );

    let addr = format!("{}:{}", config.listen_host, config.listen_port);
    let state = AppState::build(config).await;

    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods(tower_http::cors::Any)
        .allow_headers(tower_http::cors::Any);
    let app = routes::configure(state).layer(cors);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}

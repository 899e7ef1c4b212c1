use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

use oxidized_method::method::MethodConfig;
use oxidized_method::middleware::apply_cors;
use oxidized_method::utils::init_logger;
use oxidized_method::{create_router, AppState, Config};

#[derive(Parser)]
#[command(name = "oxidized-method", version, about = "Scientific-method reasoning engine for LLM pipelines")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API (default)
    Serve,
    /// Run one query and print the outcome as JSON
    Query {
        text: String,
        /// Print pipeline events as JSON lines while the query runs
        #[arg(long)]
        stream: bool,
    },
    /// Print the active method version, phases and feature flags
    Capabilities,
    /// Load and check a method configuration document
    ValidateConfig { path: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let log_dir = std::env::var("LOG_DIR").ok();
    let _guard = init_logger(log_dir.as_deref());

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve().await,
        Command::Query { text, stream } => query(&text, stream).await,
        Command::Capabilities => {
            let state = AppState::from_config(Config::from_env()?).await?;
            let capabilities = state.orchestrator.capabilities().await;
            println!("{}", serde_json::to_string_pretty(&capabilities)?);
            Ok(())
        }
        Command::ValidateConfig { path } => {
            let config = MethodConfig::load(&path)
                .await
                .with_context(|| format!("{} is not a valid method configuration", path.display()))?;
            println!(
                "{}: version {}, {} phases, supervisor {}",
                path.display(),
                config.version,
                config.phases.len(),
                if config.supervisor_enabled { "enabled" } else { "disabled" }
            );
            Ok(())
        }
    }
}

async fn serve() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    info!("Configuration loaded: {:?}", config.server);

    let state = AppState::from_config(config.clone()).await?;
    let app = apply_cors(create_router(state), &config.server.cors_allowed_origins).layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server host or port")?;
    info!("Server listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

async fn query(text: &str, stream: bool) -> anyhow::Result<()> {
    let state = AppState::from_config(Config::from_env()?).await?;

    if !stream {
        let outcome = state.orchestrator.run(text).await?;
        println!("{}", serde_json::to_string_pretty(&outcome)?);
        return Ok(());
    }

    let mut events = Arc::clone(&state.orchestrator).run_streaming(text.to_string())?;
    while let Some(event) = events.recv().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

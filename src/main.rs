//! polypd - debug orchestrator daemon entry point.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

use polyp::adapters::agent::HttpAgentConnector;
use polyp::adapters::http::{DebugHttpConfig, DebugHttpServer};
use polyp::adapters::sqlite::{initialize_database, SqliteDebugStore};
use polyp::adapters::HttpFunctionRegistry;
use polyp::domain::ports::{AgentConnector, DebugStore, FunctionRegistry, NullFunctionRegistry};
use polyp::infrastructure::config::ConfigLoader;
use polyp::infrastructure::logging;
use polyp::services::Orchestrator;

/// Debug session orchestrator for the polyp colony control plane.
#[derive(Parser, Debug)]
#[command(name = "polypd", version, about)]
struct Cli {
    /// Path to a configuration file (defaults to .polyp/config.yaml).
    #[arg(long, env = "POLYP_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path).context("Failed to load configuration")?,
        None => ConfigLoader::load().context("Failed to load configuration")?,
    };
    if let Some(port) = cli.port {
        config.listen.port = port;
    }

    logging::init(&config.logging);

    let database_url = format!("sqlite:{}", config.database.path);
    let pool = initialize_database(&database_url)
        .await
        .context("Failed to initialize database")?;
    let store: Arc<dyn DebugStore> = Arc::new(SqliteDebugStore::new(pool));

    let connector: Arc<dyn AgentConnector> = Arc::new(HttpAgentConnector::new());
    let functions: Arc<dyn FunctionRegistry> = match &config.function_registry.endpoint {
        Some(endpoint) => Arc::new(HttpFunctionRegistry::new(endpoint)),
        None => {
            tracing::info!("no function index configured, function discovery disabled");
            Arc::new(NullFunctionRegistry)
        }
    };

    let orchestrator = Arc::new(Orchestrator::new(store, connector, functions, &config));
    let loaded = orchestrator
        .registry()
        .load_from_store()
        .await
        .context("Failed to reload registry from store")?;
    tracing::info!(agents = loaded, "registry reloaded");

    let server = DebugHttpServer::new(
        orchestrator.clone(),
        DebugHttpConfig {
            host: config.listen.host.clone(),
            port: config.listen.port,
            enable_cors: config.listen.enable_cors,
        },
    );

    server
        .serve_with_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received");
        })
        .await
        .map_err(|e| anyhow::anyhow!("server error: {e}"))?;

    orchestrator.stop();
    Ok(())
}

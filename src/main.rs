use anyhow::Result;
use clap::Parser;
use refgate::config::Config;
use refgate::server::Server;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line overrides for the environment configuration
#[derive(Debug, Parser)]
#[command(name = "refgate", version, about)]
struct Cli {
    /// Address to listen on (overrides BIND_ADDR)
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Dataset file (overrides DATA_FILE)
    #[arg(long)]
    data_file: Option<PathBuf>,

    /// Log level (overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    let mut config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    if let Some(bind) = cli.bind {
        config.bind_addr = bind;
    }
    if let Some(data_file) = cli.data_file {
        config.data_file = data_file;
    }
    if let Some(log_level) = cli.log_level {
        config.log_level = log_level;
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("refgate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting refgate service");
    tracing::info!(
        "Configuration: bind_addr={}, data_file={}, refresh_interval_secs={}",
        config.bind_addr,
        config.data_file.display(),
        config.refresh_interval_secs
    );

    // Create and run the server
    let server = Server::new(config)
        .map_err(|e| anyhow::anyhow!("Failed to create server: {}", e))?;

    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

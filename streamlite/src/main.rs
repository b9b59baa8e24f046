mod server;

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use streamlite_core::{logging, Config};

use server::StreamLiteServer;

/// Single-stream live video ingest and HLS delivery
#[derive(Debug, Parser)]
#[command(name = "streamlite", version, about)]
struct Cli {
    /// Configuration file (YAML or TOML); environment variables override it
    #[arg(short, long, env = "STREAMLITE_CONFIG")]
    config: Option<String>,

    /// Overrides `logging.level`
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let mut config =
        Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }

    // 2. Validate (fail fast on misconfigurations)
    let errors = config.validate();
    if !errors.is_empty() {
        for e in &errors {
            eprintln!("Config validation error: {e}");
        }
        anyhow::bail!("Configuration validation failed with {} error(s)", errors.len());
    }

    // 3. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("StreamLite starting...");
    info!("HTTP address: {}", config.http_address());
    info!("RTMP address: {}", config.rtmp_address());

    // 4. Wire services and run until a shutdown signal
    let config = Arc::new(config);
    let services = server::init_services(Arc::clone(&config)).await?;
    StreamLiteServer::new(config, services).run().await
}

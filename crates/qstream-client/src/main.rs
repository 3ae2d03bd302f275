//! qstream quote feed client - Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Streaming quote feed client
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via QSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    qstream_telemetry::init_logging()?;

    info!("Starting qstream v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > QSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("QSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = qstream_client::AppConfig::from_file(&config_path)?;
    info!(
        host = %config.server.host,
        subscriptions = config.subscriptions.len(),
        "Configuration loaded"
    );

    let app = qstream_client::Application::new(config)?;
    let stats = app.run().await?;

    info!(
        price_updates = stats.price_updates,
        disconnects = stats.disconnects,
        "Shutdown complete"
    );
    Ok(())
}

//! tickstream - Entry Point
//!
//! Keeps exchange market-data streams alive and serves realtime candle
//! series plus connection health over HTTP.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Streaming market-data service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via TICKSTREAM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize TLS crypto provider (must be before any WS connections)
    tickstream_ws::init_crypto();

    let args = Args::parse();

    // Determine config path: CLI arg > TICKSTREAM_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("TICKSTREAM_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    let config = tickstream_app::AppConfig::from_file(&config_path)?;

    // RUST_LOG still overrides the configured level
    tickstream_telemetry::init_logging_with_default(&config.telemetry.log_level)?;

    info!("Starting tickstream v{}", env!("CARGO_PKG_VERSION"));
    info!(
        config_path = %config_path,
        ws_base_url = %config.ws_base_url,
        rest_base_url = %config.rest_base_url,
        charts = config.charts.len(),
        streams = config.streams.len(),
        "Configuration loaded"
    );

    let app = tickstream_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}

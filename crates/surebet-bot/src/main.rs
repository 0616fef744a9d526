//! Surebet placer - Entry Point
//!
//! Reads surebet signals as JSON lines from stdin and places hedges on the
//! configured venue.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Cross-venue surebet placer
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via SUREBET_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    surebet_telemetry::init_logging()?;

    info!("Starting surebet-bot v{}", env!("CARGO_PKG_VERSION"));

    // CLI arg > SUREBET_CONFIG env var > default
    let config_path = args
        .config
        .or_else(|| std::env::var("SUREBET_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, "Loading configuration");

    let config = surebet_bot::AppConfig::from_file(&config_path)?;
    info!(
        demo_mode = config.placer.demo_mode,
        target_profit = %config.placer.target_profit,
        markets = config.paper.markets.len(),
        "Configuration loaded"
    );

    let mut app = surebet_bot::Application::new(config)?;
    let summary = app.run(tokio::io::stdin()).await?;
    info!(?summary, "Run complete");

    Ok(())
}

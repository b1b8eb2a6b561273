//! BIM-Link Daemon - Main entry point
//!
//! Serves the device mapping, model files and the telemetry proxy to the
//! viewer and dashboard.

mod api;
mod config;
mod server;
mod state;
mod telemetry;

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "bimlink")]
#[command(about = "BIM-Link middleware: device mapping, model files and telemetry proxy")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "bimlink.toml")]
    config: PathBuf,

    /// Bind address for web server
    #[arg(short, long)]
    bind: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("BIM-Link v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;
    if let Some(bind) = args.bind {
        config.daemon.bind = bind;
    }

    info!(
        mapping = %config.mapping.path,
        models = %config.mapping.model_dir().display(),
        thingsboard = config.thingsboard.base_url.as_deref().unwrap_or("(from mapping)"),
        "Configuration loaded"
    );

    let bind = config.daemon.bind.clone();
    let state = state::AppState::new(config).await?;
    server::run(state, &bind).await
}

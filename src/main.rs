//! `cyclemon` binary entry point.

use clap::Parser;
use cyclemon::app::Application;
use cyclemon::clock::SystemClock;
use cyclemon::config::Settings;
use cyclemon::error::AppResult;
use cyclemon::notify::LogSink;
use cyclemon::worker::SimulatedWorker;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Debug, Parser)]
#[command(name = "cyclemon", version, about = "Cycle monitor with threshold alerting")]
struct Cli {
    /// Path to a TOML configuration file.
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        error!(%err, "monitor terminated with error");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> AppResult<()> {
    let settings = Settings::new(cli.config.as_deref())?;
    info!(
        cycle_interval = ?settings.monitor.cycle_interval,
        health_interval = ?settings.health.check_interval,
        "configuration loaded"
    );

    let app = Application::new(settings, Arc::new(SystemClock), Arc::new(LogSink));
    app.run(SimulatedWorker::default()).await
}

mod error;
mod state;

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::state::{create_default_config, load_config, ServingRuntime};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    #[arg(long, default_value = "serving.toml")]
    config: PathBuf,
    /// Write a default config file when none exists.
    #[arg(long)]
    init_config: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    if args.init_config && !args.config.exists() {
        create_default_config(&args.config)?;
    }
    let config = load_config(&args.config)?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.get_string("log.level")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
    if !args.config.exists() {
        warn!(path = %args.config.display(), "config file missing, using defaults");
    }

    let runtime = tokio::task::spawn_blocking(move || ServingRuntime::from_config(&config)).await??;
    info!("serving started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    tokio::task::spawn_blocking(move || runtime.shutdown()).await?;
    Ok(())
}

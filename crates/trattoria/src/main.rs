//! Trattoria server binary.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use trattoria::config::ConfigLoader;
use trattoria::core::SystemClock;
use trattoria::server::ShutdownSignal;
use trattoria::telemetry::init_telemetry;
use trattoria::Service;

/// Default configuration file, read when present.
const DEFAULT_CONFIG_FILE: &str = "trattoria.toml";

/// Environment variable prefix for configuration overrides.
const ENV_PREFIX: &str = "TRATTORIA";

/// Command line arguments.
#[derive(Parser, Debug)]
#[command(name = "trattoria")]
#[command(about = "Restaurant CRUD API with rate limiting and idempotent POST replay")]
#[command(version)]
struct Args {
    /// Configuration file (TOML or JSON).
    #[arg(short, long, env = "TRATTORIA_CONFIG")]
    config: Option<PathBuf>,

    /// Start from development defaults (pretty logs, metrics off).
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut loader = ConfigLoader::new();
    if args.dev {
        loader = loader.with_development();
    }
    loader = match &args.config {
        Some(path) => loader
            .with_file(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => loader.with_optional_file(DEFAULT_CONFIG_FILE)?,
    };
    let config = loader
        .with_dotenv()
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("invalid configuration")?;

    init_telemetry(&config.telemetry.to_telemetry_config())
        .context("failed to initialize telemetry")?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        http_addr = %config.server.http_addr,
        "starting trattoria"
    );

    let service = Service::from_config(&config, SystemClock::shared())
        .context("failed to open idempotency store")?;
    service.run(ShutdownSignal::with_os_signals()).await?;

    Ok(())
}

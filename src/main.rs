//! Agrotel API Server
//!
//! Run with: cargo run --bin agrotel
//!
//! # Configuration
//!
//! Settings come from a TOML file (see `agrotel --print-config`),
//! then `AGROTEL_*` environment variables, then the flags below.
//! `RUST_LOG` overrides the configured log level.

use agrotel::api::{serve, AppState};
use agrotel::config::{generate_default_config, Config};
use agrotel::logging::init_tracing;
use agrotel::storage::TelemetryStore;
use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "agrotel")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Field sensor telemetry server")]
struct Args {
    /// Config file (default: search standard locations)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Directory holding the database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Print a default config file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    if args.print_config {
        print!("{}", generate_default_config());
        return Ok(());
    }

    let mut config = Config::resolve(args.config.as_deref()).context("loading configuration")?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.storage.data_dir = data_dir;
    }

    init_tracing(&config.logging).context("initializing logging")?;

    tracing::info!("Starting Agrotel server v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Data directory: {:?}", config.storage.data_dir);

    let store = TelemetryStore::open(config.storage.clone())
        .await
        .with_context(|| format!("opening store in {:?}", config.storage.data_dir))?;

    let stats = store.stats().await?;
    tracing::info!(
        devices = stats.device_count,
        readings = stats.reading_count,
        "Store opened"
    );

    let state = AppState::with_hub_config(store, config.api.clone(), config.hub.clone());

    serve(state, &config.api)
        .await
        .with_context(|| format!("serving on {}", config.api.addr()))?;

    tracing::info!("Agrotel server stopped");
    Ok(())
}

//! wheelhouse-node - runs a registry with an echo worker pool until Ctrl-C.

use std::path::PathBuf;

use clap::Parser;
use wheelhouse::{Config, Registry};

#[derive(Debug, Parser)]
#[command(name = "wheelhouse-node", version, about = "Run a wheelhouse module registry")]
struct Args {
    /// JSON configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Members in the echo worker pool.
    #[arg(long, default_value_t = 4)]
    workers: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load configuration
    let config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize observability
    wheelhouse::observability::init_tracing(&config.observability);

    let registry = Registry::new(config)?;
    let pool = registry.create_workers("echo", args.workers)?;
    pool.register_rpc_handler("echo", |_ctx, args| args.to_vec())?;
    registry.start()?;

    tracing::info!(
        workers = pool.size(),
        active = registry.active_loops(),
        "wheelhouse-node running, Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown requested");
    registry.close().await;
    Ok(())
}

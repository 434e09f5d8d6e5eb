mod server;

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::info;

use dtvault_core::{bootstrap::load_config, logging, ThumbnailSpec, Upstreams};

use server::BffServer;

#[derive(Parser, Debug)]
#[command(name = "dtvault-bff")]
#[command(about = "DTVault back-end-for-front-end: video relay and thumbnails", long_about = None)]
struct Args {
    /// Configuration file (YAML or TOML)
    #[arg(long, short = 'c', env = "DTVAULT_BFF_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // 1. Load and validate configuration
    let config = load_config(args.config.as_deref())?;

    // 2. Initialize logging
    logging::init_logging(&config.logging)?;
    info!("DTVault BFF starting...");
    info!("HTTP address: {}", config.http_address());

    // 3. Resolve upstream services
    let upstreams = Arc::new(Upstreams::from_config(&config.upstream)?);
    info!(
        storage = %upstreams.storage,
        encoder = %upstreams.encoder,
        "Upstream services configured"
    );

    // 4. Serve until shutdown
    let thumbnail = ThumbnailSpec::from(&config.thumbnail);
    BffServer::new(config, upstreams, thumbnail).start().await
}

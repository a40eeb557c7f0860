//! fileferry: a reactor-based file transfer server
//!
//! Features:
//! - Length-prefixed TEXT/BINARY framing over TCP
//! - `list`, `get` and `put` against a single data directory
//! - Bounded worker pool with backpressure at accept
//! - Idle connection eviction
//! - Configuration via CLI arguments or TOML file

use fileferry::{Config, Server};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        workers = config.workers,
        max_connections = config.max_connections,
        ttl_secs = config.ttl_secs,
        root = %config.root.display(),
        "Starting fileferry server"
    );

    Server::bind(&config)?.run()?;
    Ok(())
}

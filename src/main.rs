//! pollkv server binary.
//!
//! Loads configuration, installs logging, binds the listener and hands it
//! to the event loop.

use pollkv::config::Config;
use pollkv::runtime;
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
        listen = %config.listen,
        max_connections = config.max_connections,
        backlog = config.backlog,
        "Starting pollkv server"
    );

    runtime::run(&config)?;
    Ok(())
}

//! echoplex: an edge-triggered TCP echo server.
//!
//! One thread owns the kernel readiness queue; a fixed worker pool echoes
//! whatever bytes clients send, verbatim, with no framing.

use echoplex::config::Config;
use echoplex::runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

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
        buffer_size = config.buffer_size,
        "Starting echoplex server"
    );

    runtime::run(config)?;
    Ok(())
}

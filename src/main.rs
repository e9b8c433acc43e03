//! ack-server: a TCP server that acknowledges every message
//!
//! Each client connection gets its own task. Every chunk of bytes read from
//! a client is logged and answered with the same fixed acknowledgement.
//!
//! Features:
//! - Connect, message, disconnect and error logging
//! - Graceful shutdown on Ctrl-C
//! - Configuration via CLI arguments or TOML file

mod config;
mod connection;
mod protocol;
mod server;

use config::Config;
use server::Server;
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
        buffer_size = config.buffer_size,
        workers = ?config.workers,
        "Starting ack-server"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.enable_all().build()?;

    runtime.block_on(run(config))?;

    info!("Server stopped");
    Ok(())
}

async fn run(config: Config) -> std::io::Result<()> {
    let server = Server::bind(&config).await?;
    server.run(tokio::signal::ctrl_c()).await;
    Ok(())
}

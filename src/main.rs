//! Chat server entry point.
//!
//! Listens on port 5050 by default; see `--help` for overrides.

use tubes_chat::config::Config;
use tubes_chat::server::Server;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    tubes_chat::init_logging(&config.log_level);

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        log_file = %config.log_file.display(),
        "Starting tubes-chat server"
    );

    let server = Server::bind(&config)?;
    server.run().await?;
    Ok(())
}

//! hallo-server: answers every connection with one reply line.

use hallo_tcp::{logging, Server, ServerConfig};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ServerConfig::load()?;
    logging::init(&config.log_level);

    info!(
        listen = %config.listen,
        backlog = config.backlog,
        mode = ?config.mode,
        reply_delay_ms = config.reply_delay_ms(),
        "Starting hallo server"
    );

    let server = Server::bind(&config).await?;
    server
        .run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Interrupt received"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for interrupts");
                    std::future::pending::<()>().await
                }
            }
        })
        .await?;

    Ok(())
}

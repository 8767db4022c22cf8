//! hallo-client: sends one greeting line and prints the reply.

use hallo_tcp::{logging, Client, ClientConfig};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = ClientConfig::load()?;
    logging::init(&config.log_level);

    Client::new(config).exchange().await?;
    Ok(())
}

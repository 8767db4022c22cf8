//! hallo-tcp: a one-line TCP greeting exchange
//!
//! The client connects, sends `HalloXXXX` and prints the reply. The server
//! accepts connections, prints each request and answers `Hallo`, then
//! closes the connection.
//!
//! Features:
//! - Line protocol with one request and one reply per connection
//! - Sequential or concurrent connection handling
//! - Per-connection fault isolation in the accept loop
//! - Optional reply delay and read timeouts
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod console;
pub mod logging;
pub mod net;
pub mod protocol;
pub mod server;

pub use client::Client;
pub use config::{ClientConfig, ServerConfig, ServerMode};
pub use server::{Server, ServerState, ServerStats};

//! TCP client sending one greeting line and printing the reply.

use crate::config::ClientConfig;
use crate::console::Console;
use crate::net::{self, PeerName};
use crate::protocol;
use std::io;
use std::net::IpAddr;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Client instance
pub struct Client {
    config: ClientConfig,
    console: Console,
}

impl Client {
    /// Create a client that prints its transcript to stdout.
    pub fn new(config: ClientConfig) -> Self {
        Self::with_console(config, Console::stdout())
    }

    pub fn with_console(config: ClientConfig, console: Console) -> Self {
        Self { config, console }
    }

    /// Connect, send the greeting, and read one reply line.
    ///
    /// Returns the reply, `None` if the server closed without answering.
    /// The connection is closed before returning, on success or error.
    pub async fn exchange(&self) -> io::Result<Option<String>> {
        let target = format!("{}:{}", self.config.host, self.config.port);
        debug!(%target, "Connecting");

        let stream =
            net::with_timeout(self.config.connect_timeout, TcpStream::connect(&target)).await?;
        let remote = stream.peer_addr()?;
        info!(peer = %remote, "Connected");

        let host = self.host_name(remote.ip()).await;
        self.console.line(&format!(
            "Pripojuju se na : {} se jmenem : {}",
            remote.ip(),
            host
        ));

        let mut stream = BufReader::new(stream);
        protocol::write_line(&mut stream, &self.config.message).await?;

        let reply =
            net::with_timeout(self.config.read_timeout, protocol::read_line(&mut stream)).await?;
        self.console.line(&protocol::received(reply.as_deref()));

        Ok(reply)
    }

    /// The configured host name, or a reverse lookup when it is a literal address.
    async fn host_name(&self, remote: IpAddr) -> String {
        if self.config.host.parse::<IpAddr>().is_ok() {
            PeerName::lookup(remote, true).await.host
        } else {
            self.config.host.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Transcript;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> ClientConfig {
        ClientConfig {
            port,
            ..ClientConfig::default()
        }
    }

    #[tokio::test]
    async fn test_exchange_with_stub_server() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            stream.write_all(b"Hallo\n").await.unwrap();
            line
        });

        let transcript = Transcript::new();
        let client = Client::with_console(config_for(port), transcript.console());
        let reply = client.exchange().await.unwrap();

        assert_eq!(reply.as_deref(), Some("Hallo"));
        assert_eq!(stub.await.unwrap(), "HalloXXXX\n");

        let lines = transcript.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("Pripojuju se na : 127.0.0.1 se jmenem : "));
        assert_eq!(lines[1], "Message Received: Hallo");
    }

    #[tokio::test]
    async fn test_exchange_server_closes_without_reply() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let stub = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            line
        });

        let transcript = Transcript::new();
        let client = Client::with_console(config_for(port), transcript.console());

        let reply = client.exchange().await.unwrap();
        assert_eq!(reply, None);
        assert_eq!(stub.await.unwrap(), "HalloXXXX\n");
        assert_eq!(transcript.lines().last().unwrap(), "Message Received: ");
    }

    #[tokio::test]
    async fn test_exchange_connection_refused() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let transcript = Transcript::new();
        let client = Client::with_console(config_for(port), transcript.console());
        assert!(client.exchange().await.is_err());
        assert!(transcript.lines().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_read_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let silent = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
            drop(stream);
        });

        let config = ClientConfig {
            read_timeout: Some(Duration::from_millis(100)),
            ..config_for(port)
        };
        let client = Client::with_console(config, Transcript::new().console());
        let err = client.exchange().await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);

        silent.abort();
    }

    #[tokio::test]
    async fn test_named_host_is_printed_verbatim() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            stream.read_line(&mut line).await.unwrap();
            stream.write_all(b"Hallo\n").await.unwrap();
        });

        let transcript = Transcript::new();
        let config = ClientConfig {
            host: "localhost".to_string(),
            ..config_for(port)
        };
        let client = Client::with_console(config, transcript.console());

        let reply = client.exchange().await.unwrap();
        assert_eq!(reply.as_deref(), Some("Hallo"));

        let lines = transcript.lines();
        assert!(lines[0].ends_with(" se jmenem : localhost"));
        assert_eq!(lines[1], "Message Received: Hallo");
    }
}

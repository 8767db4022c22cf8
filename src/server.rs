//! TCP server answering one line per connection.
//!
//! The accept loop has two states. It waits in [`ServerState::Listening`]
//! for a client, then in [`ServerState::Serving`] reads one request line,
//! prints it, writes the reply line and closes the connection.
//!
//! A failed exchange only affects its own connection: the error is logged
//! and the loop goes back to accepting.

use crate::config::{ServerConfig, ServerMode};
use crate::console::Console;
use crate::net::{self, PeerName};
use crate::protocol;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tracing::{debug, error, info, trace, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Printed once before the listener is bound.
pub const BANNER: &str = "Server TCP";

/// Accept loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Waiting for the next connection.
    Listening,
    /// Handling the current connection's exchange (sequential mode only).
    Serving,
}

/// Connection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub accepted: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
}

/// Reads one request line and answers with the reply line.
#[derive(Debug, Clone)]
pub struct Responder {
    reply: Arc<str>,
    reply_delay: Duration,
    read_timeout: Option<Duration>,
}

impl Responder {
    pub fn new(reply: &str) -> Self {
        Self {
            reply: Arc::from(reply),
            reply_delay: Duration::ZERO,
            read_timeout: None,
        }
    }

    /// Wait this long between reading the request and sending the reply.
    pub fn with_reply_delay(mut self, delay: Duration) -> Self {
        self.reply_delay = delay;
        self
    }

    /// Fail the exchange if no line arrives within `limit`.
    pub fn with_read_timeout(mut self, limit: Option<Duration>) -> Self {
        self.read_timeout = limit;
        self
    }

    /// Run one exchange on `stream` and close its write side.
    ///
    /// Returns the request line, `None` if the peer sent nothing.
    pub async fn respond<S>(&self, stream: S, console: &Console) -> io::Result<Option<String>>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut stream = BufReader::new(stream);

        let request =
            net::with_timeout(self.read_timeout, protocol::read_line(&mut stream)).await?;
        console.line(&protocol::received(request.as_deref()));

        if !self.reply_delay.is_zero() {
            tokio::time::sleep(self.reply_delay).await;
        }

        protocol::write_line(&mut stream, &self.reply).await?;
        stream.shutdown().await?;

        Ok(request)
    }
}

/// State shared between the accept loop and connection tasks.
struct Shared {
    responder: Responder,
    console: Console,
    counters: Counters,
    resolve_hostnames: bool,
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    mode: ServerMode,
    connection_limit: Arc<Semaphore>,
    shared: Arc<Shared>,
    state: watch::Sender<ServerState>,
}

impl Server {
    /// Print the banner and bind the listener, writing the transcript to stdout.
    pub async fn bind(config: &ServerConfig) -> io::Result<Self> {
        Self::bind_with_console(config, Console::stdout()).await
    }

    /// Print the banner and bind the listener.
    pub async fn bind_with_console(config: &ServerConfig, console: Console) -> io::Result<Self> {
        console.line(BANNER);

        let listener = net::bind(&config.listen, config.backlog).await?;
        info!(
            address = %listener.local_addr()?,
            backlog = config.backlog,
            mode = ?config.mode,
            "Server listening"
        );

        let responder = Responder::new(&config.reply)
            .with_reply_delay(config.reply_delay)
            .with_read_timeout(config.read_timeout);

        let (state, _) = watch::channel(ServerState::Listening);

        Ok(Server {
            listener,
            mode: config.mode,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            shared: Arc::new(Shared {
                responder,
                console,
                counters: Counters::default(),
                resolve_hostnames: config.resolve_hostnames,
            }),
            state,
        })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Subscribe to accept loop state changes.
    pub fn watch_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> ServerStats {
        let counters = &self.shared.counters;
        ServerStats {
            accepted: counters.accepted.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Accept connections forever.
    pub async fn run(&self) -> io::Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` completes.
    ///
    /// In sequential mode an exchange in progress finishes before shutdown
    /// is noticed. Concurrent connection tasks are left to finish on their own.
    pub async fn run_until<F>(&self, shutdown: F) -> io::Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            // Wait for a connection slot
            let permit = match self.mode {
                ServerMode::Sequential => None,
                ServerMode::Concurrent => tokio::select! {
                    permit = self.connection_limit.clone().acquire_owned() => {
                        Some(permit.map_err(io::Error::other)?)
                    }
                    _ = &mut shutdown => break,
                },
            };

            let accepted = tokio::select! {
                accepted = self.listener.accept() => accepted,
                _ = &mut shutdown => break,
            };

            match accepted {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);

                    match self.mode {
                        ServerMode::Sequential => {
                            self.set_state(ServerState::Serving);
                            handle_connection(&self.shared, stream, addr).await;
                            self.set_state(ServerState::Listening);
                        }
                        ServerMode::Concurrent => {
                            let shared = Arc::clone(&self.shared);
                            tokio::spawn(async move {
                                handle_connection(&shared, stream, addr).await;
                                drop(permit);
                            });
                        }
                    }
                }
                Err(e) => accept_failed(&e).await,
            }
        }

        info!("Server shutting down");
        Ok(())
    }

    fn set_state(&self, state: ServerState) {
        trace!(?state, "State change");
        self.state.send_replace(state);
    }
}

async fn accept_failed(e: &io::Error) {
    error!(error = %e, "Failed to accept connection");
    tokio::time::sleep(ACCEPT_BACKOFF).await;
}

/// Serve one accepted connection, confining any failure to it.
async fn handle_connection(shared: &Shared, stream: TcpStream, addr: SocketAddr) {
    match serve(shared, stream, addr).await {
        Ok(()) => {
            shared.counters.completed.fetch_add(1, Ordering::Relaxed);
            debug!(peer = %addr, "Connection closed");
        }
        Err(e) => {
            shared.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(peer = %addr, error = %e, "Connection error");
        }
    }
}

async fn serve(shared: &Shared, stream: TcpStream, addr: SocketAddr) -> io::Result<()> {
    let peer = PeerName::lookup(addr.ip(), shared.resolve_hostnames).await;
    shared
        .console
        .line(&format!("Pripojil se klient z: {}/{}", peer.address, peer.host));

    let request = shared.responder.respond(stream, &shared.console).await?;
    trace!(peer = %addr, ?request, "Exchange complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::Transcript;
    use std::time::Instant;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_respond() {
        let transcript = Transcript::new();
        let mock = tokio_test::io::Builder::new()
            .read(b"HalloXXXX\n")
            .write(b"Hallo\n")
            .build();

        let request = Responder::new("Hallo")
            .respond(mock, &transcript.console())
            .await
            .unwrap();

        assert_eq!(request.as_deref(), Some("HalloXXXX"));
        assert_eq!(transcript.lines(), vec!["Message Received: HalloXXXX"]);
    }

    #[tokio::test]
    async fn test_respond_ignores_request_content() {
        for request in ["", "anything at all", "PING", "Hallo"] {
            let transcript = Transcript::new();
            let input = format!("{request}\r\n");
            let mock = tokio_test::io::Builder::new()
                .read(input.as_bytes())
                .write(b"Hallo\n")
                .build();

            let got = Responder::new("Hallo")
                .respond(mock, &transcript.console())
                .await
                .unwrap();
            assert_eq!(got.as_deref(), Some(request));
        }
    }

    #[tokio::test]
    async fn test_respond_after_early_close() {
        let transcript = Transcript::new();
        let (mut client, server) = tokio::io::duplex(64);
        client.shutdown().await.unwrap();

        let request = Responder::new("Hallo")
            .respond(server, &transcript.console())
            .await
            .unwrap();

        assert_eq!(request, None);
        assert_eq!(transcript.lines(), vec!["Message Received: "]);

        let mut reply = String::new();
        client.read_to_string(&mut reply).await.unwrap();
        assert_eq!(reply, "Hallo\n");
    }

    #[tokio::test]
    async fn test_respond_custom_reply() {
        let mock = tokio_test::io::Builder::new()
            .read(b"hi\n")
            .write(b"Ahoj\n")
            .build();

        Responder::new("Ahoj")
            .respond(mock, &Transcript::new().console())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_respond_reply_delay() {
        let mock = tokio_test::io::Builder::new()
            .read(b"HalloXXXX\n")
            .write(b"Hallo\n")
            .build();

        let started = Instant::now();
        Responder::new("Hallo")
            .with_reply_delay(Duration::from_millis(50))
            .respond(mock, &Transcript::new().console())
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_respond_read_error() {
        let transcript = Transcript::new();
        let mock = tokio_test::io::Builder::new()
            .read_error(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            .build();

        let err = Responder::new("Hallo")
            .respond(mock, &transcript.console())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
        assert!(transcript.lines().is_empty());
    }

    #[tokio::test]
    async fn test_accept_failure_backs_off() {
        let err = io::Error::from_raw_os_error(libc::EMFILE);

        let started = Instant::now();
        accept_failed(&err).await;
        assert!(started.elapsed() >= ACCEPT_BACKOFF);
    }

    #[tokio::test]
    async fn test_bind_prints_banner() {
        let transcript = Transcript::new();
        let config = ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };

        let server = Server::bind_with_console(&config, transcript.console())
            .await
            .unwrap();

        assert_eq!(transcript.lines(), vec![BANNER]);
        assert_ne!(server.local_addr().unwrap().port(), 0);
        assert_eq!(server.state(), ServerState::Listening);
        assert_eq!(server.stats(), ServerStats::default());
    }

    #[tokio::test]
    async fn test_bind_failure_still_prints_banner() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let transcript = Transcript::new();
        let config = ServerConfig {
            listen: taken.local_addr().unwrap().to_string(),
            ..ServerConfig::default()
        };

        assert!(Server::bind_with_console(&config, transcript.console())
            .await
            .is_err());
        assert_eq!(transcript.lines(), vec![BANNER]);
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let config = ServerConfig {
            listen: "127.0.0.1:0".to_string(),
            ..ServerConfig::default()
        };
        let server = Server::bind_with_console(&config, Transcript::new().console())
            .await
            .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        tx.send(()).unwrap();
        server
            .run_until(async {
                let _ = rx.await;
            })
            .await
            .unwrap();
        assert_eq!(server.stats().accepted, 0);
    }
}

//! Configuration for the hallo server and client.
//!
//! Both binaries accept command-line arguments and an optional TOML file.
//! CLI arguments take precedence over config file values, which take
//! precedence over the built-in defaults.

use clap::{Parser, ValueEnum};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default port used by both sides.
pub const DEFAULT_PORT: u16 = 10001;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 10;

/// Reply line the server sends to every client.
pub const DEFAULT_REPLY: &str = "Hallo";

/// Greeting line the client sends.
pub const DEFAULT_MESSAGE: &str = "HalloXXXX";

/// How the server schedules accepted connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Serve one connection at a time, inline in the accept loop.
    #[default]
    Sequential,
    /// Serve each connection in its own task.
    Concurrent,
}

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "hallo-server")]
#[command(version = "0.1.0")]
#[command(about = "Line greeting TCP server", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 127.0.0.1:10001)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Listen backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<u32>,

    /// Reply line sent to every client
    #[arg(short = 'r', long)]
    pub reply: Option<String>,

    /// Connection scheduling mode
    #[arg(long, value_enum)]
    pub mode: Option<ServerMode>,

    /// Maximum number of connections served at once in concurrent mode
    #[arg(long)]
    pub max_connections: Option<usize>,

    /// Delay before sending the reply, in milliseconds
    #[arg(long)]
    pub reply_delay_ms: Option<u64>,

    /// Give up on a client that sends nothing for this long, in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Skip reverse DNS lookups of client addresses
    #[arg(long)]
    pub no_resolve: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "hallo-client")]
#[command(version = "0.1.0")]
#[command(about = "Line greeting TCP client", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host name or address
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Line to send
    #[arg(short = 'm', long)]
    pub message: Option<String>,

    /// Connect timeout in milliseconds
    #[arg(long)]
    pub connect_timeout_ms: Option<u64>,

    /// Reply timeout in milliseconds
    #[arg(long)]
    pub read_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
    #[serde(default = "default_reply")]
    pub reply: String,
    #[serde(default)]
    pub mode: ServerMode,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default)]
    pub reply_delay_ms: u64,
    pub read_timeout_ms: Option<u64>,
    #[serde(default = "default_resolve_hostnames")]
    pub resolve_hostnames: bool,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            reply: default_reply(),
            mode: ServerMode::default(),
            max_connections: default_max_connections(),
            reply_delay_ms: 0,
            read_timeout_ms: None,
            resolve_hostnames: default_resolve_hostnames(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_message")]
    pub message: String,
    pub connect_timeout_ms: Option<u64>,
    pub read_timeout_ms: Option<u64>,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            message: default_message(),
            connect_timeout_ms: None,
            read_timeout_ms: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    format!("127.0.0.1:{DEFAULT_PORT}")
}

fn default_backlog() -> u32 {
    DEFAULT_BACKLOG
}

fn default_reply() -> String {
    DEFAULT_REPLY.to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_resolve_hostnames() -> bool {
    true
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_message() -> String {
    DEFAULT_MESSAGE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen: String,
    pub backlog: u32,
    pub reply: String,
    pub mode: ServerMode,
    pub max_connections: usize,
    pub reply_delay: Duration,
    pub read_timeout: Option<Duration>,
    pub resolve_hostnames: bool,
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::build(ServerArgs::empty(), TomlConfig::default())
    }
}

impl ServerConfig {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let args = ServerArgs::parse();
        let file = read_toml(args.config.as_deref())?;
        Self::merge(args, file)
    }

    /// Merge CLI args with a parsed TOML config (CLI takes precedence).
    pub fn merge(args: ServerArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let config = Self::build(args, file);
        config.validate()?;
        Ok(config)
    }

    fn build(args: ServerArgs, file: TomlConfig) -> Self {
        let server = file.server;
        ServerConfig {
            listen: args.listen.unwrap_or(server.listen),
            backlog: args.backlog.unwrap_or(server.backlog),
            reply: args.reply.unwrap_or(server.reply),
            mode: args.mode.unwrap_or(server.mode),
            max_connections: args.max_connections.unwrap_or(server.max_connections),
            reply_delay: Duration::from_millis(
                args.reply_delay_ms.unwrap_or(server.reply_delay_ms),
            ),
            read_timeout: args
                .read_timeout_ms
                .or(server.read_timeout_ms)
                .map(Duration::from_millis),
            resolve_hostnames: !args.no_resolve && server.resolve_hostnames,
            log_level: args.log_level.unwrap_or(file.logging.level),
        }
    }

    /// Reply delay in whole milliseconds, saturating at `u64::MAX`.
    pub fn reply_delay_ms(&self) -> u64 {
        u64::try_from(self.reply_delay.as_millis()).unwrap_or(u64::MAX)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::InvalidValue("backlog", "must be at least 1"));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue(
                "max_connections",
                "must be at least 1",
            ));
        }
        if self.reply.contains('\n') {
            return Err(ConfigError::InvalidValue(
                "reply",
                "must be a single line",
            ));
        }
        Ok(())
    }
}

impl ServerArgs {
    fn empty() -> Self {
        Self {
            config: None,
            listen: None,
            backlog: None,
            reply: None,
            mode: None,
            max_connections: None,
            reply_delay_ms: None,
            read_timeout_ms: None,
            no_resolve: false,
            log_level: None,
        }
    }
}

/// Final resolved client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    pub message: String,
    pub connect_timeout: Option<Duration>,
    pub read_timeout: Option<Duration>,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::build(ClientArgs::empty(), TomlConfig::default())
    }
}

impl ClientConfig {
    /// Load configuration from the process arguments and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        let args = ClientArgs::parse();
        let file = read_toml(args.config.as_deref())?;
        Self::merge(args, file)
    }

    /// Merge CLI args with a parsed TOML config (CLI takes precedence).
    pub fn merge(args: ClientArgs, file: TomlConfig) -> Result<Self, ConfigError> {
        let config = Self::build(args, file);
        if config.message.contains('\n') {
            return Err(ConfigError::InvalidValue(
                "message",
                "must be a single line",
            ));
        }
        Ok(config)
    }

    fn build(args: ClientArgs, file: TomlConfig) -> Self {
        let client = file.client;
        ClientConfig {
            host: args.host.unwrap_or(client.host),
            port: args.port.unwrap_or(client.port),
            message: args.message.unwrap_or(client.message),
            connect_timeout: args
                .connect_timeout_ms
                .or(client.connect_timeout_ms)
                .map(Duration::from_millis),
            read_timeout: args
                .read_timeout_ms
                .or(client.read_timeout_ms)
                .map(Duration::from_millis),
            log_level: args.log_level.unwrap_or(file.logging.level),
        }
    }
}

impl ClientArgs {
    fn empty() -> Self {
        Self {
            config: None,
            host: None,
            port: None,
            message: None,
            connect_timeout_ms: None,
            read_timeout_ms: None,
            log_level: None,
        }
    }
}

/// Read and parse the TOML file, or return the defaults when no path is given.
fn read_toml(path: Option<&Path>) -> Result<TomlConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(TomlConfig::default());
    };
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
    toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.to_path_buf(), e))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    InvalidValue(&'static str, &'static str),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(key, reason) => {
                write!(f, "Invalid value for '{key}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

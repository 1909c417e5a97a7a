//! Configuration for the chat server, client and load harness.
//!
//! The server reads command-line arguments and an optional TOML file.
//! CLI arguments take precedence over config file values, and with
//! neither the server listens on port 5050 and logs to `chat_log.txt`.

use crate::log_sink::DEFAULT_LOG_FILE;
use clap::Parser;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::path::PathBuf;

/// Port shared by server, client and load harness.
pub const DEFAULT_PORT: u16 = 5050;

/// Pending-connection backlog for the listening socket.
pub const DEFAULT_BACKLOG: i32 = 10;

/// Command-line arguments for the chat server
#[derive(Parser, Debug)]
#[command(name = "tubes-server")]
#[command(author = "tubes-chat authors")]
#[command(version = "0.1.0")]
#[command(about = "Timestamped line-echo chat server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:5050)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Pending-connection backlog
    #[arg(short = 'b', long)]
    pub backlog: Option<i32>,

    /// Chat log file
    #[arg(short = 'f', long)]
    pub log_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Pending-connection backlog
    #[serde(default = "default_backlog")]
    pub backlog: i32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
        }
    }
}

/// Chat log configuration
#[derive(Debug, Deserialize)]
pub struct ChatConfig {
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            log_file: default_log_file(),
        }
    }
}

/// Diagnostics configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_listen() -> String {
    format!("0.0.0.0:{DEFAULT_PORT}")
}

fn default_backlog() -> i32 {
    DEFAULT_BACKLOG
}

fn default_log_file() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_FILE)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved server configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: String,
    pub backlog: i32,
    pub log_file: PathBuf,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            backlog: default_backlog(),
            log_file: default_log_file(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_args(CliArgs::parse())
    }

    /// Merge parsed CLI args over the TOML file they point at, if any.
    pub fn from_args(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Ok(Config {
            listen: cli.listen.unwrap_or(toml_config.server.listen),
            backlog: cli.backlog.unwrap_or(toml_config.server.backlog),
            log_file: cli.log_file.unwrap_or(toml_config.chat.log_file),
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }
}

/// Command-line arguments for the terminal client
#[derive(Parser, Debug, Clone)]
#[command(name = "tubes-client")]
#[command(version = "0.1.0")]
#[command(about = "Terminal client for the tubes chat server", long_about = None)]
pub struct ClientArgs {
    /// IPv4 address of the chat server
    pub server: Ipv4Addr,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Username to register with (prompted for when omitted)
    #[arg(short, long)]
    pub username: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    pub log_level: String,
}

/// Command-line arguments for the load harness
#[derive(Parser, Debug, Clone)]
#[command(name = "tubes-loadtest")]
#[command(version = "0.1.0")]
#[command(about = "Opens many concurrent chat sessions against a running server", long_about = None)]
pub struct LoadArgs {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: Ipv4Addr,

    /// Server port
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of concurrent sessions
    #[arg(short, long, default_value_t = 10)]
    pub clients: usize,

    /// Number of send/receive rounds
    #[arg(short, long, default_value_t = 10)]
    pub rounds: usize,

    /// Pause between rounds in seconds
    #[arg(short, long, default_value_t = 1)]
    pub interval_secs: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
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
        }
    }
}

impl std::error::Error for ConfigError {}

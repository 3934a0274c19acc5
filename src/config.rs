//! Configuration module for the bulletin board client.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::{ArgAction, Parser};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Lowest and highest valid TCP port, inclusive.
const PORT_RANGE: std::ops::RangeInclusive<i64> = 0..=65535;

/// Command-line arguments for the client
#[derive(Parser, Debug)]
#[command(name = "simple-message-client")]
#[command(author = "bulletin-board authors")]
#[command(version = "0.1.0")]
#[command(about = "Post a message to a bulletin board server", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Full qualified domain name or IP address of the server
    #[arg(short, long)]
    pub server: Option<String>,

    /// Well-known port of the server [0..65535]
    #[arg(short, long, allow_hyphen_values = true)]
    pub port: Option<String>,

    /// Name of the posting user
    #[arg(short, long)]
    pub user: String,

    /// URL pointing to an image of the posting user
    #[arg(short, long)]
    pub image: Option<String>,

    /// Message to be added to the bulletin board
    #[arg(short, long)]
    pub message: String,

    /// Directory the returned files are written to
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Connect and read timeout in seconds
    #[arg(short, long)]
    pub timeout: Option<u64>,

    /// Verbose output (repeat for more detail)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Connection-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    /// Server host name or address
    pub server: Option<String>,
    /// Server port
    pub port: Option<i64>,
    /// Connect and read timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    /// Directory the returned files are written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server: None,
            port: None,
            timeout: default_timeout(),
            output_dir: default_output_dir(),
        }
    }
}

/// Logging configuration
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

fn default_timeout() -> u64 {
    10 // seconds
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: String,
    pub port: u16,
    pub user: String,
    pub image_url: Option<String>,
    pub message: String,
    pub output_dir: PathBuf,
    pub timeout: Duration,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let server = cli
            .server
            .or(toml_config.client.server)
            .ok_or(ConfigError::Missing("server"))?;

        let port = match (cli.port, toml_config.client.port) {
            (Some(text), _) => parse_port(&text)?,
            (None, Some(number)) => check_port_range(number)?,
            (None, None) => return Err(ConfigError::Missing("port")),
        };

        let log_level = match cli.verbose {
            0 if cli.log_level != "info" => cli.log_level,
            0 => toml_config.logging.level,
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        };

        Ok(Config {
            server,
            port,
            user: cli.user,
            image_url: cli.image,
            message: cli.message,
            output_dir: cli.output_dir.unwrap_or(toml_config.client.output_dir),
            timeout: Duration::from_secs(cli.timeout.unwrap_or(toml_config.client.timeout)),
            log_level,
        })
    }
}

/// Parse a decimal port number and check it lies in `0..=65535`.
pub fn parse_port(text: &str) -> Result<u16, ConfigError> {
    let number: i64 = text
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidPort(text.to_string()))?;
    check_port_range(number)
}

fn check_port_range(number: i64) -> Result<u16, ConfigError> {
    if !PORT_RANGE.contains(&number) {
        return Err(ConfigError::PortOutOfRange(number));
    }
    u16::try_from(number).map_err(|_| ConfigError::PortOutOfRange(number))
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Missing(&'static str),
    InvalidPort(String),
    PortOutOfRange(i64),
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
            ConfigError::Missing(what) => {
                write!(f, "No {} given on the command line or in the config file", what)
            }
            ConfigError::InvalidPort(text) => write!(f, "Can not convert port number '{}'", text),
            ConfigError::PortOutOfRange(port) => {
                write!(f, "Port number {} out of range [0..65535]", port)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

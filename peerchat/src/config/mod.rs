//! Configuration for the `peerchat` client.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/peerchat/config.toml`)
//! 4. Compiled defaults
//!
//! A missing default config file is not an error. An explicit `--config`
//! path that doesn't exist is.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::room::RelayConfig;
use crate::transport::PeerId;
use crate::transport::hub::HubClientConfig;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The hub URL is not a valid URL.
    #[error("invalid hub URL {url}: {source}")]
    InvalidHubUrl {
        /// URL as configured.
        url: String,
        /// Parse failure.
        source: url::ParseError,
    },

    /// The hub URL is not a WebSocket URL.
    #[error("hub URL {0} must use the ws:// or wss:// scheme")]
    UnsupportedScheme(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    network: NetworkFileConfig,
    chat: ChatFileConfig,
    ui: UiFileConfig,
    log: LogFileConfig,
}

/// `[network]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct NetworkFileConfig {
    hub_url: Option<String>,
    peer_id: Option<String>,
    connect_timeout_secs: Option<u64>,
    handshake_timeout_secs: Option<u64>,
}

/// `[chat]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    name: Option<String>,
    room: Option<String>,
    channel_capacity: Option<usize>,
}

/// `[ui]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
}

/// `[log]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct LogFileConfig {
    level: Option<String>,
    file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Hub WebSocket URL. `None` runs the client offline.
    pub hub_url: Option<String>,
    /// Local peer identity.
    pub peer_id: String,
    /// Display name. Empty means the relay's default.
    pub name: String,
    /// Room to join. Empty means the relay's default.
    pub room: String,
    /// Capacity of the relay channels.
    pub channel_capacity: usize,
    /// Timeout for the hub WebSocket connect.
    pub connect_timeout: Duration,
    /// Timeout for the hub `Welcome`.
    pub handshake_timeout: Duration,
    /// chrono format string for message timestamps.
    pub timestamp_format: String,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Log file. `None` means `$TMPDIR/peerchat.log`.
    pub log_file: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: None,
            peer_id: generate_peer_id(),
            name: String::new(),
            room: String::new(),
            channel_capacity: RelayConfig::default().channel_capacity,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            timestamp_format: "%H:%M".to_string(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if an explicit config file cannot be read, a
    /// config file cannot be parsed, or the hub URL is invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. A peer id is generated when neither
    /// source provides one.
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            hub_url: cli
                .hub_url
                .clone()
                .or_else(|| file.network.hub_url.clone()),
            peer_id: cli
                .peer_id
                .clone()
                .or_else(|| file.network.peer_id.clone())
                .unwrap_or(defaults.peer_id),
            name: cli
                .name
                .clone()
                .or_else(|| file.chat.name.clone())
                .unwrap_or(defaults.name),
            room: cli
                .room
                .clone()
                .or_else(|| file.chat.room.clone())
                .unwrap_or(defaults.room),
            channel_capacity: file
                .chat
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
            connect_timeout: file
                .network
                .connect_timeout_secs
                .map_or(defaults.connect_timeout, Duration::from_secs),
            handshake_timeout: file
                .network
                .handshake_timeout_secs
                .map_or(defaults.handshake_timeout, Duration::from_secs),
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
            log_level: cli
                .log_level
                .clone()
                .or_else(|| file.log.level.clone())
                .unwrap_or(defaults.log_level),
            log_file: cli.log_file.clone().or_else(|| file.log.file.clone()),
        }
    }

    /// Check the hub URL, if one is configured.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidHubUrl`] or
    /// [`ConfigError::UnsupportedScheme`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(hub_url) = &self.hub_url else {
            return Ok(());
        };
        let parsed = url::Url::parse(hub_url).map_err(|source| ConfigError::InvalidHubUrl {
            url: hub_url.clone(),
            source,
        })?;
        match parsed.scheme() {
            "ws" | "wss" => Ok(()),
            _ => Err(ConfigError::UnsupportedScheme(hub_url.clone())),
        }
    }

    /// Local peer id as a transport identifier.
    #[must_use]
    pub fn local_peer_id(&self) -> PeerId {
        PeerId::new(self.peer_id.clone())
    }

    /// Relay settings derived from this configuration.
    #[must_use]
    pub const fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            channel_capacity: self.channel_capacity,
        }
    }

    /// Hub connection settings derived from this configuration.
    #[must_use]
    pub const fn hub_client_config(&self) -> HubClientConfig {
        HubClientConfig {
            connect_timeout: self.connect_timeout,
            handshake_timeout: self.handshake_timeout,
        }
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Chat in a room over a publish/subscribe hub")]
pub struct CliArgs {
    /// WebSocket URL of the hub (e.g. `ws://127.0.0.1:9000/ws`). Omit to chat offline.
    #[arg(long, env = "PEERCHAT_HUB_URL")]
    pub hub_url: Option<String>,

    /// Local peer identity (default: a generated UUID).
    #[arg(long, env = "PEERCHAT_PEER_ID")]
    pub peer_id: Option<String>,

    /// Display name (default: `newuser`).
    #[arg(short, long, env = "PEERCHAT_NAME")]
    pub name: Option<String>,

    /// Room to join (default: `lobby`).
    #[arg(short, long, env = "PEERCHAT_ROOM")]
    pub room: Option<String>,

    /// Path to config file (default: `~/.config/peerchat/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error; default: info).
    #[arg(long, env = "PEERCHAT_LOG")]
    pub log_level: Option<String>,

    /// Path to log file (default: `$TMPDIR/peerchat.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

fn generate_peer_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Load and parse a TOML config file.
///
/// An explicit path must exist. Without one, the default path is tried and
/// a missing file yields an empty config.
fn load_config_file(explicit_path: Option<&Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("peerchat").join("config.toml");

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}

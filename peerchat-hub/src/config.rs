//! Hub settings.
//!
//! Each setting is taken from the first source that has it: command line
//! (or its environment variable), then the `[server]` table of
//! `~/.config/peerchat-hub/config.toml`, then the built-in default. The
//! result is checked before the hub binds anything.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::hub::{DEFAULT_MAX_PAYLOAD_SIZE, HubState};

/// Smallest accepted payload limit. Anything lower rejects an empty chat
/// envelope.
pub const MIN_PAYLOAD_LIMIT: usize = 64;

const DEFAULT_BIND: &str = "0.0.0.0:9000";

/// Errors raised while assembling the hub settings.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An explicitly named settings file could not be read.
    #[error("cannot read {path}: {source}")]
    Unreadable {
        /// File that was named.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The settings file is not valid TOML for the `[server]` table.
    #[error("malformed hub settings: {0}")]
    Malformed(#[from] toml::de::Error),

    /// The bind address is not `ip:port`.
    #[error("bind address {addr:?} is not ip:port: {source}")]
    BindAddr {
        /// Address as given.
        addr: String,
        /// Parse failure.
        source: std::net::AddrParseError,
    },

    /// The payload limit would refuse every chat message.
    #[error("max_payload_size {0} is below the minimum of {MIN_PAYLOAD_LIMIT} bytes")]
    PayloadLimitTooSmall(usize),
}

/// Command line of the `peerchat-hub` binary.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "PeerChat topic hub")]
pub struct HubCliArgs {
    /// Listen address, `ip:port`.
    #[arg(short, long, env = "PEERCHAT_HUB_ADDR")]
    pub bind: Option<String>,

    /// Settings file to read instead of the default location.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Largest publish payload the hub forwards, in bytes.
    #[arg(long)]
    pub max_payload_size: Option<usize>,

    /// Tracing filter used when `RUST_LOG` is unset.
    #[arg(long, env = "PEERCHAT_HUB_LOG")]
    pub log_level: Option<String>,
}

/// The `[server]` table. Keys outside it are ignored.
#[derive(Debug, Default, serde::Deserialize)]
struct ServerTable {
    bind_addr: Option<String>,
    max_payload_size: Option<usize>,
    log_level: Option<String>,
}

#[derive(Debug, Default, serde::Deserialize)]
struct SettingsFile {
    #[serde(default)]
    server: ServerTable,
}

/// Checked hub settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubConfig {
    /// Address the WebSocket listener binds to.
    pub bind_addr: SocketAddr,
    /// Largest publish payload forwarded to subscribers.
    pub max_payload_size: usize,
    /// Tracing filter used when `RUST_LOG` is unset.
    pub log_level: String,
}

impl HubConfig {
    /// Reads the settings file (if any) and merges it under `cli`.
    ///
    /// # Errors
    ///
    /// Fails if a named file is unreadable, any file is malformed, or the
    /// merged settings do not pass [`HubConfig::from_layers`].
    pub fn load(cli: &HubCliArgs) -> Result<Self, ConfigError> {
        let file = read_settings(cli.config.as_deref())?;
        Self::from_layers(cli, file.server)
    }

    fn from_layers(cli: &HubCliArgs, file: ServerTable) -> Result<Self, ConfigError> {
        let bind = cli
            .bind
            .clone()
            .or(file.bind_addr)
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind
            .parse()
            .map_err(|source| ConfigError::BindAddr { addr: bind, source })?;

        let max_payload_size = cli
            .max_payload_size
            .or(file.max_payload_size)
            .unwrap_or(DEFAULT_MAX_PAYLOAD_SIZE);
        if max_payload_size < MIN_PAYLOAD_LIMIT {
            return Err(ConfigError::PayloadLimitTooSmall(max_payload_size));
        }

        let log_level = cli
            .log_level
            .clone()
            .or(file.log_level)
            .unwrap_or_else(|| "info".to_string());

        Ok(Self {
            bind_addr,
            max_payload_size,
            log_level,
        })
    }

    /// Fresh hub state enforcing these settings.
    #[must_use]
    pub fn hub_state(&self) -> HubState {
        HubState::with_max_payload_size(self.max_payload_size)
    }
}

/// A named file must exist; the default location may be absent.
fn read_settings(named: Option<&Path>) -> Result<SettingsFile, ConfigError> {
    let (path, required) = match named {
        Some(p) => (p.to_path_buf(), true),
        None => match dirs::config_dir() {
            Some(dir) => (dir.join("peerchat-hub").join("config.toml"), false),
            None => return Ok(SettingsFile::default()),
        },
    };

    match std::fs::read_to_string(&path) {
        Ok(text) => Ok(toml::from_str(&text)?),
        Err(e) if !required && e.kind() == std::io::ErrorKind::NotFound => {
            Ok(SettingsFile::default())
        }
        Err(source) => Err(ConfigError::Unreadable { path, source }),
    }
}

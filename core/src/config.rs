//! Configuration management (synctrack.toml)
//!
//! Handles loading, saving, and providing defaults for editor and player
//! settings. Settings are stored in TOML format in the platform-specific
//! config directory, or at an explicit path given on the command line.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::edit::DEFAULT_ROWS;
use crate::net::{DEFAULT_SYNC_PORT, DEFAULT_WEBSOCKET_PORT, TransportKind, WireDialect};

/// File name inside [`config_dir`]
pub const CONFIG_FILE_NAME: &str = "synctrack.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Application configuration.
///
/// Every section falls back to its defaults when missing, so a partial file
/// only needs the values it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SyncConfig {
    /// Editor-side listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Player-side connection settings
    #[serde(default)]
    pub client: ClientConfig,
    /// Per-track file location
    #[serde(default)]
    pub tracks: TracksConfig,
    /// Row clock used by the headless player
    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address (default: 0.0.0.0)
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Raw TCP port (default: 1338)
    #[serde(default = "default_sync_port")]
    pub port: u16,
    /// WebSocket port, 0 disables the listener (default: 1339)
    #[serde(default = "default_websocket_port")]
    pub websocket_port: u16,
    /// Greeting deadline in milliseconds (default: 2000)
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    /// Concurrent sessions per listener (default: 1)
    #[serde(default = "default_max_clients")]
    pub max_clients_per_listener: usize,
    /// GET_TRACK layout (default: standard)
    #[serde(default)]
    pub dialect: WireDialect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Editor host (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,
    /// Editor port (default: 1338)
    #[serde(default = "default_sync_port")]
    pub port: u16,
    /// tcp or websocket (default: tcp)
    #[serde(default)]
    pub transport: TransportKind,
    /// Connect deadline in milliseconds (default: 250)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// GET_TRACK layout (default: standard)
    #[serde(default)]
    pub dialect: WireDialect,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TracksConfig {
    /// Directory holding the per-track files (default: .)
    #[serde(default = "default_directory")]
    pub directory: PathBuf,
    /// File name prefix (default: sync)
    #[serde(default = "default_base")]
    pub base: String,
    /// Timeline length shown by the editor (default: 128)
    #[serde(default = "default_rows")]
    pub rows: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Beats per minute (default: 150)
    #[serde(default = "default_bpm")]
    pub bpm: f64,
    /// Rows per beat (default: 8)
    #[serde(default = "default_rows_per_beat")]
    pub rows_per_beat: u32,
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_sync_port() -> u16 {
    DEFAULT_SYNC_PORT
}
fn default_websocket_port() -> u16 {
    DEFAULT_WEBSOCKET_PORT
}
fn default_handshake_timeout_ms() -> u64 {
    2000
}
fn default_max_clients() -> usize {
    1
}
fn default_connect_timeout_ms() -> u64 {
    250
}

fn default_directory() -> PathBuf {
    PathBuf::from(".")
}
fn default_base() -> String {
    "sync".to_string()
}
fn default_rows() -> u32 {
    DEFAULT_ROWS
}

fn default_bpm() -> f64 {
    150.0
}
fn default_rows_per_beat() -> u32 {
    8
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_sync_port(),
            websocket_port: default_websocket_port(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            max_clients_per_listener: default_max_clients(),
            dialect: WireDialect::default(),
        }
    }
}

impl ServerConfig {
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_sync_port(),
            transport: TransportKind::default(),
            connect_timeout_ms: default_connect_timeout_ms(),
            dialect: WireDialect::default(),
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for TracksConfig {
    fn default() -> Self {
        Self {
            directory: default_directory(),
            base: default_base(),
            rows: default_rows(),
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            bpm: default_bpm(),
            rows_per_beat: default_rows_per_beat(),
        }
    }
}

impl PlaybackConfig {
    /// Row clock rate: bpm * rows_per_beat / 60.
    pub fn rows_per_second(&self) -> f64 {
        self.bpm * f64::from(self.rows_per_beat) / 60.0
    }
}

/// Returns the platform-specific configuration directory.
///
/// On Windows: `%APPDATA%\synctrack\config`
/// On macOS: `~/Library/Application Support/io.synctrack.synctrack`
/// On Linux: `~/.config/synctrack`
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io.synctrack", "", "synctrack")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Loads the configuration from the platform config directory.
///
/// Returns default values if the file doesn't exist. An unreadable or
/// invalid file is logged and also yields defaults.
pub fn load() -> SyncConfig {
    let Some(path) = config_dir().map(|dir| dir.join(CONFIG_FILE_NAME)) else {
        return SyncConfig::default();
    };
    if !path.exists() {
        return SyncConfig::default();
    }
    match load_from(&path) {
        Ok(config) => config,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Using default config");
            SyncConfig::default()
        }
    }
}

/// Loads the configuration from an explicit path.
pub fn load_from(path: &Path) -> Result<SyncConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Saves the configuration to the platform config directory.
///
/// Does nothing when there is no home directory.
pub fn save(config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(dir) = config_dir() {
        save_to(&dir.join(CONFIG_FILE_NAME), config)?;
    }
    Ok(())
}

/// Saves the configuration to `path`, creating parent directories.
pub fn save_to(path: &Path, config: &SyncConfig) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let content = toml::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    tracing::debug!(path = %path.display(), "Saved config");
    Ok(())
}

//! Configuration loading and management.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server identity.
    pub server: ServerConfig,
    /// Network listeners.
    pub listen: ListenConfig,
    /// Database configuration.
    pub database: Option<DatabaseConfig>,
    /// Identity token verification.
    pub auth: AuthConfig,
    /// Race tuning knobs.
    #[serde(default)]
    pub game: GameConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

/// Server identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name (e.g., "uplink.local").
    pub name: String,
}

/// Listener addresses.
#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    /// WebSocket listener address.
    pub websocket: SocketAddr,
    /// HTTP API listener address.
    pub http: SocketAddr,
    /// Allowed Origin values for the WebSocket handshake.
    /// Empty means any origin is accepted.
    #[serde(default)]
    pub allow_origins: Vec<String>,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to SQLite database file, or ":memory:".
    pub path: String,
}

/// Identity token verification.
///
/// Tokens are minted by the external account layer with the same shared
/// secret; the core only verifies them.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// HMAC-SHA256 secret shared with the token issuer.
    pub secret: String,
}

/// Race tuning knobs.
#[derive(Debug, Clone, Deserialize)]
pub struct GameConfig {
    /// Seconds between the start broadcast and input acceptance.
    #[serde(default = "default_countdown_secs")]
    pub countdown_secs: u64,

    /// Milliseconds between opponent-progress broadcasts during a race.
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,

    /// Participant count for rooms materialized by matchmaking.
    #[serde(default = "default_matchmaking_players")]
    pub matchmaking_players: u32,

    /// Seconds a Finished room lingers for stragglers before retirement.
    #[serde(default = "default_finished_grace_secs")]
    pub finished_grace_secs: u64,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            countdown_secs: default_countdown_secs(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
            matchmaking_players: default_matchmaking_players(),
            finished_grace_secs: default_finished_grace_secs(),
        }
    }
}

impl GameConfig {
    pub fn countdown(&self) -> Duration {
        Duration::from_secs(self.countdown_secs)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(1))
    }

    pub fn finished_grace(&self) -> Duration {
        Duration::from_secs(self.finished_grace_secs)
    }
}

fn default_countdown_secs() -> u64 {
    3
}

fn default_broadcast_interval_ms() -> u64 {
    500
}

fn default_matchmaking_players() -> u32 {
    2
}

fn default_finished_grace_secs() -> u64 {
    60
}

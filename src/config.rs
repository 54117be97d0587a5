//! Server configuration: defaults, environment overrides, interval floors.

use std::path::PathBuf;
use std::time::Duration;

/// Floor for the change-feed poll interval. Values below this would hammer
/// the store without making the feed meaningfully fresher.
const MIN_POLL_INTERVAL_MS: u64 = 100;

/// Floor for the heartbeat interval.
const MIN_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub poll_interval_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 2718,
            db_path: PathBuf::from(".switchyard/board.db"),
            poll_interval_ms: 1_000,
            heartbeat_interval_ms: 30_000,
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    /// Defaults overlaid with `SWITCHYARD_*` environment variables.
    /// Unparseable values are reported and ignored rather than fatal.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(port) = parse_var("SWITCHYARD_PORT") {
            config.port = port;
        }
        if let Ok(path) = std::env::var("SWITCHYARD_DB") {
            if !path.is_empty() {
                config.db_path = PathBuf::from(path);
            }
        }
        if let Some(ms) = parse_var("SWITCHYARD_POLL_INTERVAL_MS") {
            config.poll_interval_ms = ms;
        }
        if let Some(ms) = parse_var("SWITCHYARD_HEARTBEAT_INTERVAL_MS") {
            config.heartbeat_interval_ms = ms;
        }
        config
    }

    /// Poll interval with the floor applied.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(MIN_POLL_INTERVAL_MS))
    }

    /// Heartbeat interval with the floor applied.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(MIN_HEARTBEAT_INTERVAL_MS))
    }
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {} value '{}'", name, value);
            None
        }
    }
}

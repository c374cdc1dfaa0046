//! Server Configuration
//!
//! Process-level settings, read from the environment with defaults for
//! every value.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::rules::BattleConfig;
use crate::network::session::SessionTimeouts;

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket bind address.
    pub ws_bind_addr: SocketAddr,
    /// Session Directory HTTP bind address.
    pub http_bind_addr: SocketAddr,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Connections silent for longer are treated as disconnected.
    pub idle_timeout: Duration,
    /// Waiting sessions older than this are purged.
    pub waiting_ttl: Duration,
    /// Ready sessions not started within this are ended.
    pub ready_ttl: Duration,
    /// Finished sessions are removed after this long.
    pub finished_grace: Duration,
    /// How often the cleanup loop runs.
    pub cleanup_interval: Duration,
    /// Reject WebSocket connections that present no token.
    pub require_auth: bool,
    /// Outbound queue depth per connection.
    pub outbound_buffer: usize,
    /// Battle constants.
    pub battle: BattleConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ws_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            http_bind_addr: SocketAddr::from(([0, 0, 0, 0], 8081)),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            waiting_ttl: Duration::from_secs(600),
            ready_ttl: Duration::from_secs(600),
            finished_grace: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(5),
            require_auth: false,
            outbound_buffer: 64,
            battle: BattleConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables. Unset variables keep
    /// their defaults; malformed ones are an error.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        Ok(Self {
            ws_bind_addr: env_or("WS_BIND_ADDR", defaults.ws_bind_addr)?,
            http_bind_addr: env_or("HTTP_BIND_ADDR", defaults.http_bind_addr)?,
            max_connections: env_or("MAX_CONNECTIONS", defaults.max_connections)?,
            idle_timeout: env_secs("IDLE_TIMEOUT_SECS", defaults.idle_timeout)?,
            waiting_ttl: env_secs("WAITING_TTL_SECS", defaults.waiting_ttl)?,
            ready_ttl: env_secs("READY_TTL_SECS", defaults.ready_ttl)?,
            finished_grace: env_secs("FINISHED_GRACE_SECS", defaults.finished_grace)?,
            cleanup_interval: env_secs("CLEANUP_INTERVAL_SECS", defaults.cleanup_interval)?,
            require_auth: match std::env::var("REQUIRE_AUTH") {
                Ok(v) => v == "true" || v == "1",
                Err(_) => defaults.require_auth,
            },
            ..defaults
        })
    }

    /// Session expiry windows for the cleanup loop.
    pub fn session_timeouts(&self) -> SessionTimeouts {
        SessionTimeouts {
            waiting_ttl: self.waiting_ttl,
            ready_ttl: self.ready_ttl,
            finished_grace: self.finished_grace,
        }
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value }),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    env_or(name, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.ws_bind_addr.port(), 8080);
        assert_eq!(config.http_bind_addr.port(), 8081);
        assert_eq!(config.max_connections, 1000);
        assert_eq!(config.idle_timeout, Duration::from_secs(300));
        assert_eq!(config.finished_grace, Duration::from_secs(5));
        assert!(!config.require_auth);
        assert_eq!(config.battle.starting_health, 30);
        assert_eq!(config.session_timeouts(), SessionTimeouts::default());
    }

    #[test]
    fn test_env_parsing() {
        std::env::set_var("CARDBATTLE_TEST_PORT", "9000");
        std::env::set_var("CARDBATTLE_TEST_BAD", "nine");

        assert_eq!(env_or("CARDBATTLE_TEST_PORT", 1u16).unwrap(), 9000);
        assert_eq!(env_or("CARDBATTLE_TEST_UNSET", 7u16).unwrap(), 7);
        assert!(matches!(
            env_or("CARDBATTLE_TEST_BAD", 1u16),
            Err(ConfigError::InvalidValue { name: "CARDBATTLE_TEST_BAD", .. })
        ));
        assert_eq!(
            env_secs("CARDBATTLE_TEST_PORT", Duration::ZERO).unwrap(),
            Duration::from_secs(9000)
        );
    }
}

//! Process Configuration
//!
//! Server settings read from the environment. Every variable is optional.
//!
//! | Variable          | Default   | Meaning                                   |
//! |-------------------|-----------|-------------------------------------------|
//! | `PORT`            | `3000`    | Listen port on `0.0.0.0`                  |
//! | `BIND_ADDR`       | unset     | Full socket address, overrides `PORT`     |
//! | `MAX_PLAYERS`     | `20`      | Room capacity                             |
//! | `ROOM_GRACE_SECS` | `300`     | Delay before an empty room is evicted     |
//! | `MAX_CONNECTIONS` | `1000`    | Concurrent socket limit                   |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::warn;

use crate::network::registry::{RegistryConfig, DEFAULT_MAX_PLAYERS, DEFAULT_ROOM_ID};

/// Default listen port.
pub const DEFAULT_PORT: u16 = 3000;

/// Default connection limit.
pub const DEFAULT_MAX_CONNECTIONS: usize = 1000;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `PORT` is not a port number.
    #[error("Invalid PORT value: {0}")]
    InvalidPort(String),

    /// `BIND_ADDR` is not a socket address.
    #[error("Invalid BIND_ADDR value: {0}")]
    InvalidBindAddr(String),

    /// A numeric variable did not parse.
    #[error("Invalid {name} value: {value}")]
    InvalidNumber {
        /// Variable name.
        name: &'static str,
        /// Raw value.
        value: String,
    },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Room registry settings.
    pub registry: RegistryConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            registry: RegistryConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            let port: u16 = port.trim().parse().map_err(|_| ConfigError::InvalidPort(port.clone()))?;
            config.bind_addr.set_port(port);
        }

        if let Some(addr) = lookup("BIND_ADDR") {
            config.bind_addr = addr
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidBindAddr(addr.clone()))?;
        }

        // Capacity falls back rather than failing startup.
        config.registry.max_players = match lookup("MAX_PLAYERS") {
            Some(raw) => match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    warn!("Ignoring invalid MAX_PLAYERS={:?}, using {}", raw, DEFAULT_MAX_PLAYERS);
                    DEFAULT_MAX_PLAYERS
                }
            },
            None => DEFAULT_MAX_PLAYERS,
        };

        if let Some(raw) = lookup("ROOM_GRACE_SECS") {
            let secs = parse_number("ROOM_GRACE_SECS", &raw)?;
            config.registry.grace_period = Duration::from_secs(secs);
        }

        if let Some(raw) = lookup("MAX_CONNECTIONS") {
            config.max_connections = parse_number("MAX_CONNECTIONS", &raw)? as usize;
        }

        config.registry.default_room_id = DEFAULT_ROOM_ID.to_string();
        Ok(config)
    }
}

fn parse_number(name: &'static str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        name,
        value: raw.to_string(),
    })
}

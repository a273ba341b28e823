//! Service configuration loaded from environment variables.
//!
//! # Environment Variables
//!
//! ## Required
//! - `POSTGRES_URL` - `PostgreSQL` connection string
//!
//! ## Optional
//! - `HOST` - Bind address (default: 0.0.0.0)
//! - `PORT` - Listen port (default: 3000)
//! - `LOG_LEVEL` - Log filter used when `RUST_LOG` is not set (default: info)
//! - `DATABASE_MAX_CONNECTIONS` - Connection pool size (default: 5)

use std::net::{IpAddr, SocketAddr};

use secrecy::SecretString;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid environment variable {0}: {1}")]
    InvalidEnvVar(String, String),
}

#[derive(Clone)]
pub struct Config {
    /// Contains the database password
    pub postgres_url: SecretString,
    pub host: IpAddr,
    pub port: u16,
    pub log_level: String,
    pub max_connections: u32,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("postgres_url", &"[REDACTED]")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("log_level", &self.log_level)
            .field("max_connections", &self.max_connections)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Calls `dotenvy::dotenv()` to load from `.env` file if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get_or_default =
            |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let postgres_url = lookup("POSTGRES_URL")
            .map(SecretString::from)
            .ok_or_else(|| ConfigError::MissingEnvVar("POSTGRES_URL".into()))?;
        let host = parse_var("HOST", &get_or_default("HOST", "0.0.0.0"))?;
        let port = parse_var("PORT", &get_or_default("PORT", "3000"))?;
        let log_level = get_or_default("LOG_LEVEL", "info");
        let max_connections = parse_var(
            "DATABASE_MAX_CONNECTIONS",
            &get_or_default("DATABASE_MAX_CONNECTIONS", "5"),
        )?;

        Ok(Self {
            postgres_url,
            host,
            port,
            log_level,
            max_connections,
        })
    }

    /// Returns the socket address for binding the server.
    pub const fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

fn parse_var<T>(key: &str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidEnvVar(key.to_string(), e.to_string()))
}

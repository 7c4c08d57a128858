//! Runtime configuration loaded from environment variables.

use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{Context, Result};

const DEV_SESSION_SECRET: &str = "dev-secret";

/// Postgres settings. Absent `DATABASE_URL` selects the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Server bind address (default `0.0.0.0:8080`).
    pub bind_address: SocketAddr,

    /// HS256 secret used to verify session tokens.
    pub session_secret: String,

    pub database: Option<DatabaseConfig>,

    /// Treat an organization's bootstrap owner as its administrator.
    pub bootstrap_owner_is_admin: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from any key lookup. Invalid values are errors;
    /// missing ones fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let bind_address: SocketAddr =
            parse_or(&lookup, "FORMGATE_BIND", SocketAddr::from(([0, 0, 0, 0], 8080)))?;

        let session_secret = match lookup("SESSION_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                tracing::warn!("SESSION_SECRET not set; using insecure dev default");
                DEV_SESSION_SECRET.to_string()
            }
        };

        let database = match lookup("DATABASE_URL").filter(|s| !s.is_empty()) {
            Some(url) => Some(DatabaseConfig {
                url,
                max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 10)?,
                statement_timeout_ms: parse_or(&lookup, "DB_STATEMENT_TIMEOUT_MS", 5_000)?,
            }),
            None => None,
        };

        let bootstrap_owner_is_admin: bool = parse_or(&lookup, "BOOTSTRAP_OWNER_IS_ADMIN", true)?;

        Ok(Self {
            bind_address,
            session_secret,
            database,
            bootstrap_owner_is_admin,
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: '{raw}'")),
        None => Ok(default),
    }
}

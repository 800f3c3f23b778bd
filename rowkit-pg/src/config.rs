//! Database configuration.
//!
//! Loaded from a TOML file or from the environment. The time zone used to
//! render timestamp columns lives here and is handed to the execution
//! engine when it is built; nothing reads it from global state.

use std::path::Path;

use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{DbError, DbResult};

/// Default maximum connections for the pool.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Attempts per statement while the server refuses connections.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Seconds the pool waits for a connection before giving up on an attempt.
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 5;

/// Zone timestamps are rendered in unless configured otherwise.
pub const DEFAULT_TIMEZONE: &str = "Asia/Ho_Chi_Minh";

fn default_database_url() -> String {
    "postgres://localhost/postgres".to_string()
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}

fn default_acquire_timeout_secs() -> u64 {
    DEFAULT_ACQUIRE_TIMEOUT_SECS
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Per-attempt wait for a pooled connection
    #[serde(default = "default_acquire_timeout_secs")]
    pub acquire_timeout_secs: u64,

    /// Attempts per statement on connection refused (minimum 1)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// IANA zone name for rendering timestamp columns
    #[serde(default = "default_timezone")]
    pub timezone: String,

    /// Log every statement, its parameters and a preview of its rows
    #[serde(default)]
    pub log_statements: bool,

    /// Remember each table's columns after the first catalog lookup
    #[serde(default = "default_true")]
    pub cache_schema: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timezone: default_timezone(),
            log_statements: false,
            cache_schema: true,
        }
    }
}

impl DbConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn load(path: impl AsRef<Path>) -> DbResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| DbError::Config(format!("failed to read {}: {}", path.display(), e)))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| DbError::Config(format!("invalid TOML in {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Build from environment variables, reading `.env` first if present.
    ///
    /// `DATABASE_URL`, `ROWKIT_MAX_CONNECTIONS`, `ROWKIT_ACQUIRE_TIMEOUT`,
    /// `ROWKIT_MAX_ATTEMPTS`, `ROWKIT_TIMEZONE`, `ROWKIT_DEBUG`,
    /// `ROWKIT_CACHE_SCHEMA`.
    pub fn from_env() -> DbResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            debug!("Loaded .env from {}", path.display());
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; `from_env` with the source injected.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(v) = lookup("ROWKIT_MAX_CONNECTIONS") {
            config.max_connections = parse_number("ROWKIT_MAX_CONNECTIONS", &v)?;
        }
        if let Some(v) = lookup("ROWKIT_ACQUIRE_TIMEOUT") {
            config.acquire_timeout_secs = parse_number("ROWKIT_ACQUIRE_TIMEOUT", &v)?.into();
        }
        if let Some(v) = lookup("ROWKIT_MAX_ATTEMPTS") {
            config.max_attempts = parse_number("ROWKIT_MAX_ATTEMPTS", &v)?;
        }
        if let Some(tz) = lookup("ROWKIT_TIMEZONE") {
            config.timezone = tz;
        }
        if let Some(v) = lookup("ROWKIT_DEBUG") {
            config.log_statements = parse_flag(&v);
        }
        if let Some(v) = lookup("ROWKIT_CACHE_SCHEMA") {
            config.cache_schema = parse_flag(&v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parsed time zone.
    pub fn tz(&self) -> DbResult<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| DbError::Config(format!("unknown timezone '{}'", self.timezone)))
    }

    fn validate(&self) -> DbResult<()> {
        self.tz()?;
        if self.max_attempts == 0 {
            return Err(DbError::Config("max_attempts must be at least 1".into()));
        }
        if self.acquire_timeout_secs == 0 {
            return Err(DbError::Config("acquire_timeout_secs must be at least 1".into()));
        }
        if self.max_connections == 0 {
            return Err(DbError::Config("max_connections must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> DbResult<u32> {
    value
        .trim()
        .parse()
        .map_err(|_| DbError::Config(format!("{} must be a positive integer, got '{}'", key, value)))
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

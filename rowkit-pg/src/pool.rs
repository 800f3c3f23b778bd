//! Database connection pool management
//!
//! Uses sqlx PgPool with explicit connection limits. Pools are created
//! lazily: no connection is opened until the first statement, so a server
//! that is down shows up as a refused connection inside the engine's retry
//! loop rather than at startup.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};

/// Create a PostgreSQL connection pool from `config`.
///
/// # Errors
///
/// Returns [`DbError::Connect`] if the connection string cannot be parsed.
///
/// # Example
///
/// ```ignore
/// let pool = create_pool(&DbConfig::from_env()?).await?;
/// ```
pub async fn create_pool(config: &DbConfig) -> DbResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect_lazy(&config.database_url)
        .map_err(DbError::Connect)
}

//! Error types for rowkit-pg

use thiserror::Error;

pub type DbResult<T> = Result<T, DbError>;

#[derive(Error, Debug)]
pub enum DbError {
    /// Input rejected before any statement was issued
    #[error(transparent)]
    Spec(#[from] rowkit_core::Error),

    /// Connection kept being refused until the attempt cap was reached
    #[error("connection refused after {attempts} attempt(s): {source}")]
    TransientConnection {
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Database reported any other failure; never retried
    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    /// Pool could not be created
    #[error("connect failed: {0}")]
    Connect(#[source] sqlx::Error),

    /// Statement succeeded but its result has the wrong shape
    #[error("unexpected result: {0}")]
    UnexpectedResult(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// True for the retryable connection-refused condition.
    pub fn is_transient(&self) -> bool {
        matches!(self, DbError::TransientConnection { .. })
    }
}

/// `sqlx::Error` for a server that refused the connection.
///
/// The pool retries refused connects on its own until its acquire timeout
/// and then reports `PoolTimedOut`, so that counts as refused too.
pub fn is_connection_refused(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(io) => io.kind() == std::io::ErrorKind::ConnectionRefused,
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

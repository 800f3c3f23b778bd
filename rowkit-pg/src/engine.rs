//! Execution engine: retry on refused connections, then normalize rows.
//!
//! Per statement:
//!
//! ```text
//! ATTEMPT -> ok ------------------------------> NORMALIZE -> DONE
//!         -> connection refused, attempt < max -> ATTEMPT
//!         -> anything else / attempt == max ---> FAILED
//! ```
//!
//! Retries are immediate. Normalization renders temporal columns as
//! `YYYY-MM-DD HH:MM:SS` in the configured zone and drops the soft-delete
//! column; which columns are temporal comes from the declared column types
//! reported with the result, never from the values themselves.

use std::future::Future;

use chrono::{TimeZone, Utc};
use chrono_tz::Tz;
use rowkit_core::{QueryPlan, SqlValue, SOFT_DELETE_COLUMN};
use serde_json::Value as JsonValue;
use tracing::{debug, error, warn};

use crate::backend::{Backend, ColumnKind, ResultSet};
use crate::config::{DbConfig, DEFAULT_MAX_ATTEMPTS};
use crate::error::{is_connection_refused, DbError, DbResult};

/// Output format for temporal columns.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Rows shown in a result log line before the rest are summarized.
const LOG_PREVIEW_ROWS: usize = 2;

/// A normalized result row.
pub type Row = serde_json::Map<String, JsonValue>;

/// Rows plus the count reported for the statement (rows returned, or rows
/// affected for statements run for their count).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub row_count: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    /// Attempts per statement while connections are refused (minimum 1)
    pub max_attempts: u32,
    /// Zone temporal columns are rendered in
    pub timezone: Tz,
    /// Log statements, parameters and result previews at debug level
    pub log_statements: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            timezone: chrono_tz::Asia::Ho_Chi_Minh,
            log_statements: false,
        }
    }
}

impl EngineSettings {
    pub fn from_config(config: &DbConfig) -> DbResult<Self> {
        Ok(Self {
            max_attempts: config.max_attempts.max(1),
            timezone: config.tz()?,
            log_statements: config.log_statements,
        })
    }
}

pub struct Engine<B> {
    backend: B,
    settings: EngineSettings,
}

impl<B: Backend> Engine<B> {
    pub fn new(backend: B, settings: EngineSettings) -> Self {
        Self { backend, settings }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run a row-producing statement and normalize its rows.
    pub async fn fetch(&self, plan: &QueryPlan) -> DbResult<QueryResult> {
        self.log_statement(plan);
        let set = self
            .with_retry(plan, || self.backend.fetch(&plan.sql, &plan.params))
            .await?;

        let rows = normalize(set, self.settings.timezone);
        if self.should_log(plan) {
            debug!(rows = %preview(&rows), "results");
        }
        Ok(QueryResult {
            row_count: rows.len() as u64,
            rows,
        })
    }

    /// Run a statement for its affected-row count.
    pub async fn execute(&self, plan: &QueryPlan) -> DbResult<QueryResult> {
        self.log_statement(plan);
        let affected = self
            .with_retry(plan, || self.backend.execute(&plan.sql, &plan.params))
            .await?;

        if self.should_log(plan) {
            debug!(affected, "results");
        }
        Ok(QueryResult {
            rows: Vec::new(),
            row_count: affected,
        })
    }

    async fn with_retry<T, F, Fut>(&self, plan: &QueryPlan, op: F) -> DbResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, sqlx::Error>>,
    {
        let max_attempts = self.settings.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if is_connection_refused(&err) && attempt < max_attempts => {
                    warn!(attempt, max_attempts, "connection refused, retrying");
                }
                Err(err) if is_connection_refused(&err) => {
                    error!(attempts = attempt, sql = %plan.sql, "connection refused, giving up");
                    return Err(DbError::TransientConnection {
                        attempts: attempt,
                        source: err,
                    });
                }
                Err(sqlx::Error::ColumnDecode { index, source }) => {
                    error!(column = %index, error = %source, sql = %plan.sql, "undecodable column");
                    return Err(DbError::UnexpectedResult(format!(
                        "column '{}' could not be decoded: {}",
                        index, source
                    )));
                }
                Err(err) => {
                    if self.should_log(plan) {
                        error!(error = %err, sql = %plan.sql, "statement failed");
                    }
                    return Err(DbError::Query(err));
                }
            }
        }
    }

    fn should_log(&self, plan: &QueryPlan) -> bool {
        self.settings.log_statements && !plan.catalog
    }

    fn log_statement(&self, plan: &QueryPlan) {
        if self.should_log(plan) {
            debug!(sql = %plan.sql, params = ?plan.params, "executing");
        }
    }
}

/// Convert raw rows into output rows: temporal columns formatted in `tz`,
/// soft-delete column removed.
pub fn normalize(set: ResultSet, tz: Tz) -> Vec<Row> {
    let ResultSet { columns, rows } = set;
    rows.into_iter()
        .map(|values| {
            columns
                .iter()
                .zip(values)
                .filter(|(col, _)| col.name != SOFT_DELETE_COLUMN)
                .map(|(col, value)| (col.name.clone(), render_cell(col.kind, value, tz)))
                .collect()
        })
        .collect()
}

fn render_cell(kind: ColumnKind, value: SqlValue, tz: Tz) -> JsonValue {
    let formatted = match (kind, &value) {
        (ColumnKind::Timestamp, SqlValue::Timestamp(ts)) => {
            Some(ts.with_timezone(&tz).format(TIMESTAMP_FORMAT).to_string())
        }
        // zone-less timestamps are stored as UTC
        (ColumnKind::LocalTimestamp, SqlValue::LocalTimestamp(ts)) => Some(
            Utc.from_utc_datetime(ts)
                .with_timezone(&tz)
                .format(TIMESTAMP_FORMAT)
                .to_string(),
        ),
        // calendar dates carry no instant to convert
        (ColumnKind::Date, SqlValue::Date(d)) => d
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string()),
        _ => None,
    };
    match formatted {
        Some(s) => JsonValue::String(s),
        None => value.into_json(),
    }
}

/// First rows of a result for logging, with the remainder summarized.
fn preview(rows: &[Row]) -> String {
    let shown: Vec<String> = rows
        .iter()
        .take(LOG_PREVIEW_ROWS)
        .map(|r| JsonValue::Object(r.clone()).to_string())
        .collect();
    if rows.len() > LOG_PREVIEW_ROWS {
        format!(
            "[{}, ... AND {} MORE ITEMS]",
            shown.join(", "),
            rows.len() - LOG_PREVIEW_ROWS
        )
    } else {
        format!("[{}]", shown.join(", "))
    }
}

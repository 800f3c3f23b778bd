//! The caller-facing CRUD surface.
//!
//! `Db` ties the pieces together for each call: parse the column spec,
//! ask the introspector about the table, assemble the plan, run it through
//! the engine. Input errors surface before any statement is sent.

use futures::future::join_all;
use rowkit_core::plan::{self, TableInfo};
use rowkit_core::{ColumnSpec, ColumnTypes, Filter, QueryOptions, QueryPlan, Record, SqlValue};
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use tracing::{debug, info};

use crate::backend::Backend;
use crate::config::DbConfig;
use crate::engine::{Engine, EngineSettings, QueryResult, Row};
use crate::error::{DbError, DbResult};
use crate::pool::create_pool;
use crate::schema::SchemaIntrospector;

/// One row or several, for [`Db::insert`].
#[derive(Debug, Clone, PartialEq)]
pub enum Rows {
    One(Record),
    Many(Vec<Record>),
}

impl Rows {
    fn into_vec(self) -> Vec<Record> {
        match self {
            Rows::One(r) => vec![r],
            Rows::Many(rs) => rs,
        }
    }

    /// A JSON object is one row, an array of objects is many.
    pub fn from_json(value: JsonValue) -> Option<Self> {
        match value {
            JsonValue::Array(items) => items
                .into_iter()
                .map(Record::from_json)
                .collect::<Option<Vec<_>>>()
                .map(Rows::Many),
            other => Record::from_json(other).map(Rows::One),
        }
    }
}

impl From<Record> for Rows {
    fn from(r: Record) -> Self {
        Rows::One(r)
    }
}

impl From<Vec<Record>> for Rows {
    fn from(rs: Vec<Record>) -> Self {
        Rows::Many(rs)
    }
}

pub struct Db<B = PgPool> {
    engine: Engine<B>,
    schema: SchemaIntrospector,
}

impl Db<PgPool> {
    /// Create the pool and wire the engine from `config`.
    pub async fn connect(config: &DbConfig) -> DbResult<Self> {
        let pool = create_pool(config).await?;
        info!(max_connections = config.max_connections, "database pool ready");
        Self::with_backend(pool, config)
    }
}

impl<B: Backend> Db<B> {
    pub fn with_backend(backend: B, config: &DbConfig) -> DbResult<Self> {
        let schema = if config.cache_schema {
            SchemaIntrospector::cached()
        } else {
            SchemaIntrospector::uncached()
        };
        Ok(Self::from_parts(
            Engine::new(backend, EngineSettings::from_config(config)?),
            schema,
        ))
    }

    pub fn from_parts(engine: Engine<B>, schema: SchemaIntrospector) -> Self {
        Self { engine, schema }
    }

    pub fn engine(&self) -> &Engine<B> {
        &self.engine
    }

    pub fn schema(&self) -> &SchemaIntrospector {
        &self.schema
    }

    /// Rows of `table` selected by a column spec such as
    /// `"id,name,owner->org(org_id){org_name}"`.
    ///
    /// Soft-deleted rows are excluded whenever the table has `deleted_at`.
    /// The statement is assembled once without schema facts first, so bad
    /// input is rejected before the catalog is consulted. Every operation
    /// below does the same.
    pub async fn select(
        &self,
        table: &str,
        columns: &str,
        options: &QueryOptions,
    ) -> DbResult<Vec<Row>> {
        let spec = ColumnSpec::parse(columns)?;
        plan::select(table, &spec, options, &TableInfo::default())?;

        let info = self.schema.table_info(&self.engine, table).await?;
        let plan = plan::select(table, &spec, options, &info)?;
        Ok(self.engine.fetch(&plan).await?.rows)
    }

    /// `COUNT(columns)` (or `COUNT(*)` for an empty spec) over the filtered rows.
    pub async fn count(&self, table: &str, columns: &str, options: &QueryOptions) -> DbResult<i64> {
        let spec = ColumnSpec::parse(columns)?;
        plan::count(table, &spec, options, &TableInfo::default())?;

        let info = self.schema.table_info(&self.engine, table).await?;
        let plan = plan::count(table, &spec, options, &info)?;
        let result = self.engine.fetch(&plan).await?;

        result
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(count_value)
            .ok_or_else(|| DbError::UnexpectedResult("COUNT returned no count column".into()))
    }

    /// Insert one row or many. Each row is its own statement; all are sent
    /// concurrently and returned rows come back in input order.
    ///
    /// Every statement runs to completion. If any failed, the first failure
    /// (in input order) is returned and rows that did insert stay inserted.
    pub async fn insert(
        &self,
        table: &str,
        rows: impl Into<Rows>,
        returning: Option<&str>,
    ) -> DbResult<Vec<Row>> {
        let rows = rows.into().into_vec();
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        for row in &rows {
            plan::insert(table, row, returning, &ColumnTypes::new())?;
        }

        let types = self.schema.table_info(&self.engine, table).await?.column_types;
        let plans = rows
            .iter()
            .map(|row| plan::insert(table, row, returning, &types))
            .collect::<Result<Vec<_>, _>>()?;

        let results = join_all(plans.iter().map(|p| self.engine.fetch(p))).await;
        let mut inserted = Vec::with_capacity(results.len());
        for result in results {
            // a row the RETURNING clause produced nothing for is skipped
            if let Some(row) = result?.rows.into_iter().next() {
                inserted.push(row);
            }
        }
        debug!(table, inserted = inserted.len(), "insert complete");
        Ok(inserted)
    }

    /// Update rows matching `options.filter`. NULL fields in `data` are left
    /// unchanged; `updated_at` is stamped when the table has it.
    pub async fn update(
        &self,
        table: &str,
        data: &Record,
        options: &QueryOptions,
    ) -> DbResult<Vec<Row>> {
        // an empty record is only valid when the table stamps updated_at,
        // which the catalog has yet to confirm
        let stamped = TableInfo {
            updated_at: true,
            ..Default::default()
        };
        plan::update(table, data, options, &stamped)?;

        let info = self.schema.table_info(&self.engine, table).await?;
        let plan = plan::update(table, data, options, &info)?;
        Ok(self.engine.fetch(&plan).await?.rows)
    }

    /// Delete matching rows; true when at least one row was removed.
    pub async fn remove(&self, table: &str, filter: impl Into<Filter>) -> DbResult<bool> {
        let filter = filter.into();
        plan::delete(table, &filter, &ColumnTypes::new())?;

        let types = self.schema.table_info(&self.engine, table).await?.column_types;
        let plan = plan::delete(table, &filter, &types)?;
        Ok(self.engine.execute(&plan).await?.row_count > 0)
    }

    pub async fn exists_column(&self, table: &str, column: &str) -> DbResult<bool> {
        self.schema.column_exists(&self.engine, table, column).await
    }

    /// Run a hand-written statement through the same retry and normalization path.
    pub async fn query(&self, sql: &str, params: Vec<SqlValue>) -> DbResult<QueryResult> {
        self.engine.fetch(&QueryPlan::new(sql, params)).await
    }
}

fn count_value(value: &JsonValue) -> Option<i64> {
    match value {
        JsonValue::Number(n) => n.as_i64(),
        JsonValue::String(s) => s.parse().ok(),
        _ => None,
    }
}

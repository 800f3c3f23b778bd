//! Scripted in-memory backend for exercising `Db` without a server.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rowkit_core::SqlValue;
use rowkit_pg::{Backend, ColumnKind, ColumnMeta, DbConfig, Db, ResultSet};

type FetchHandler = Box<dyn Fn(&str, &[SqlValue]) -> Result<ResultSet, sqlx::Error> + Send + Sync>;

/// `(column_name, data_type, udt_name)` as `information_schema.columns` reports them.
pub type CatalogColumn = (&'static str, &'static str, &'static str);

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl Call {
    pub fn is_catalog(&self) -> bool {
        self.sql.contains("information_schema.columns")
    }
}

/// Answers catalog lookups from registered tables; every other statement
/// goes to the fetch handler (or reports `affected` rows for execute).
pub struct ScriptedBackend {
    tables: HashMap<String, Vec<CatalogColumn>>,
    on_fetch: FetchHandler,
    affected: u64,
    calls: Mutex<Vec<Call>>,
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self {
            tables: HashMap::new(),
            on_fetch: Box::new(|_, _| Ok(ResultSet::default())),
            affected: 0,
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(mut self, table: &str, columns: &[CatalogColumn]) -> Self {
        self.tables.insert(table.to_string(), columns.to_vec());
        self
    }

    pub fn on_fetch(
        mut self,
        handler: impl Fn(&str, &[SqlValue]) -> Result<ResultSet, sqlx::Error> + Send + Sync + 'static,
    ) -> Self {
        self.on_fetch = Box::new(handler);
        self
    }

    pub fn affected(mut self, n: u64) -> Self {
        self.affected = n;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls other than catalog lookups.
    pub fn statements(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| !c.is_catalog()).collect()
    }

    pub fn catalog_calls(&self) -> usize {
        self.calls().iter().filter(|c| c.is_catalog()).count()
    }

    fn record(&self, sql: &str, params: &[SqlValue]) {
        self.calls.lock().unwrap().push(Call {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
    }

    fn catalog(&self, sql: &str, params: &[SqlValue]) -> ResultSet {
        let table = match params.first() {
            Some(SqlValue::Text(t)) => t.as_str(),
            _ => return ResultSet::default(),
        };
        let columns = self.tables.get(table).cloned().unwrap_or_default();

        if sql.contains("column_name = $2") {
            let wanted = match params.get(1) {
                Some(SqlValue::Text(c)) => c.clone(),
                _ => return ResultSet::default(),
            };
            let mut set = ResultSet::new(vec![ColumnMeta::new("column_name", ColumnKind::Other)]);
            if columns.iter().any(|(c, _, _)| *c == wanted) {
                set = set.with_row(vec![SqlValue::Text(wanted)]);
            }
            return set;
        }

        columns.into_iter().fold(
            ResultSet::new(vec![
                ColumnMeta::new("column_name", ColumnKind::Other),
                ColumnMeta::new("data_type", ColumnKind::Other),
                ColumnMeta::new("udt_schema", ColumnKind::Other),
                ColumnMeta::new("udt_name", ColumnKind::Other),
            ]),
            |set, (c, t, u)| {
                let schema = if t == "USER-DEFINED" { "public" } else { "pg_catalog" };
                set.with_row(vec![
                    SqlValue::from(c),
                    SqlValue::from(t),
                    SqlValue::from(schema),
                    SqlValue::from(u),
                ])
            },
        )
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, sqlx::Error> {
        self.record(sql, params);
        if sql.contains("information_schema.columns") {
            return Ok(self.catalog(sql, params));
        }
        (self.on_fetch)(sql, params)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error> {
        self.record(sql, params);
        Ok(self.affected)
    }
}

/// `users(id, name, owner, deleted_at)`; soft-delete, no update stamp.
pub const USERS: &[CatalogColumn] = &[
    ("id", "integer", "int4"),
    ("name", "text", "text"),
    ("owner", "integer", "int4"),
    ("deleted_at", "timestamp with time zone", "timestamptz"),
];

/// `items(id, a, b, updated_at)`; update stamp, no soft-delete.
pub const ITEMS: &[CatalogColumn] = &[
    ("id", "integer", "int4"),
    ("a", "integer", "int4"),
    ("b", "text", "text"),
    ("updated_at", "timestamp with time zone", "timestamptz"),
];

/// `visits(id, code, email, seen_at, born, deleted_at)`: types a text or
/// int8 parameter cannot be bound to without a cast.
pub const VISITS: &[CatalogColumn] = &[
    ("id", "uuid", "uuid"),
    ("code", "character varying", "varchar"),
    ("email", "USER-DEFINED", "citext"),
    ("seen_at", "timestamp with time zone", "timestamptz"),
    ("born", "date", "date"),
    ("deleted_at", "timestamp with time zone", "timestamptz"),
];

pub fn config() -> DbConfig {
    DbConfig {
        timezone: "UTC".into(),
        ..Default::default()
    }
}

pub fn db(backend: ScriptedBackend) -> Db<ScriptedBackend> {
    Db::with_backend(backend, &config()).expect("valid config")
}

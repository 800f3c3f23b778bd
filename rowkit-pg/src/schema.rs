//! Schema introspection against `information_schema.columns`.
//!
//! Answers "does table T have column C?" for the soft-delete and
//! update-stamp decisions, and reports each column's declared type so bound
//! parameters can be cast to it. With caching enabled each table is looked up
//! once and its column list kept for the life of the introspector; the
//! schema is assumed not to change underneath a running process.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rowkit_core::plan::{self, TableInfo};
use rowkit_core::{SOFT_DELETE_COLUMN, UPDATED_AT_COLUMN};
use tracing::debug;

use crate::backend::Backend;
use crate::engine::{Engine, Row};
use crate::error::DbResult;

/// Declared columns of one table, in ordinal order, each with the type
/// name its parameters are cast to.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableSchema {
    columns: Vec<(String, String)>,
}

impl TableSchema {
    pub fn new(columns: Vec<(String, String)>) -> Self {
        Self { columns }
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|(name, _)| name == column)
    }

    pub fn info(&self) -> TableInfo {
        TableInfo {
            soft_delete: self.has_column(SOFT_DELETE_COLUMN),
            updated_at: self.has_column(UPDATED_AT_COLUMN),
            column_types: self
                .columns
                .iter()
                .map(|(name, type_name)| (name.as_str(), type_name.as_str()))
                .collect(),
        }
    }

    fn from_catalog(rows: &[Row]) -> Self {
        let field = |row: &Row, key: &str| row.get(key).and_then(|v| v.as_str()).map(str::to_owned);
        let columns = rows
            .iter()
            .filter_map(|row| {
                let name = field(row, "column_name")?;
                let type_name = cast_type(
                    &field(row, "data_type").unwrap_or_default(),
                    &field(row, "udt_schema").unwrap_or_default(),
                    &field(row, "udt_name").unwrap_or_default(),
                );
                Some((name, type_name))
            })
            .collect();
        Self::new(columns)
    }
}

/// Cast target for a catalog column: the underlying type name (`int4`,
/// `_text`, `timestamptz`), schema-qualified for extension and user types.
fn cast_type(data_type: &str, udt_schema: &str, udt_name: &str) -> String {
    if data_type == "USER-DEFINED" && !udt_schema.is_empty() {
        format!("{}.{}", type_ident(udt_schema), type_ident(udt_name))
    } else {
        type_ident(udt_name)
    }
}

fn type_ident(name: &str) -> String {
    let plain = name
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_lowercase() || c == '_')
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if plain {
        name.to_owned()
    } else {
        format!("\"{}\"", name)
    }
}

#[derive(Default)]
pub struct SchemaIntrospector {
    /// `None` when caching is off
    cache: Option<RwLock<HashMap<String, Arc<TableSchema>>>>,
}

impl SchemaIntrospector {
    /// Every question goes to the catalog.
    pub fn uncached() -> Self {
        Self { cache: None }
    }

    /// One catalog lookup per table, remembered afterwards.
    pub fn cached() -> Self {
        Self {
            cache: Some(RwLock::new(HashMap::new())),
        }
    }

    pub fn is_caching(&self) -> bool {
        self.cache.is_some()
    }

    /// Does `table` have `column`?
    pub async fn column_exists<B: Backend>(
        &self,
        engine: &Engine<B>,
        table: &str,
        column: &str,
    ) -> DbResult<bool> {
        if self.cache.is_some() {
            return Ok(self.table_schema(engine, table).await?.has_column(column));
        }
        let result = engine.fetch(&plan::column_exists(table, column)).await?;
        Ok(!result.rows.is_empty())
    }

    /// Soft-delete / update-stamp facts and column types for `table`.
    pub async fn table_info<B: Backend>(
        &self,
        engine: &Engine<B>,
        table: &str,
    ) -> DbResult<TableInfo> {
        Ok(self.table_schema(engine, table).await?.info())
    }

    /// All declared columns of `table`, served from the cache when enabled.
    ///
    /// A table that does not exist yields an empty schema (and is cached as
    /// such).
    pub async fn table_schema<B: Backend>(
        &self,
        engine: &Engine<B>,
        table: &str,
    ) -> DbResult<Arc<TableSchema>> {
        if let Some(hit) = self.cached_schema(table) {
            return Ok(hit);
        }

        // lock released while the catalog query runs; a concurrent miss
        // just repeats the same read-only lookup
        let result = engine.fetch(&plan::table_columns(table)).await?;
        let schema = Arc::new(TableSchema::from_catalog(&result.rows));
        debug!(table, columns = schema.columns.len(), "loaded table schema");

        if let Some(cache) = &self.cache {
            let mut guard = cache.write().unwrap_or_else(|e| e.into_inner());
            guard.insert(table.to_owned(), Arc::clone(&schema));
        }
        Ok(schema)
    }

    fn cached_schema(&self, table: &str) -> Option<Arc<TableSchema>> {
        let cache = self.cache.as_ref()?;
        let guard = cache.read().unwrap_or_else(|e| e.into_inner());
        guard.get(table).cloned()
    }
}

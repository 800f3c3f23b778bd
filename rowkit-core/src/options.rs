//! Per-call options for select/count/update.

use serde::Deserialize;

use crate::filter::{Condition, Filter};

/// Sort direction for `ORDER BY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    #[serde(alias = "ASC")]
    Asc,
    #[serde(alias = "DESC")]
    Desc,
}

impl SortOrder {
    pub fn as_sql(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

/// Options recognised by the query operations.
///
/// Deserializes from the option-object shape
/// `{"where": ..., "orderBy": "col", "order": "desc", "skip": 20, "limit": 10,
/// "extra": "GROUP BY x", "return": "id,name"}`.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueryOptions {
    #[serde(default, rename = "where")]
    pub filter: Filter,
    #[serde(default, rename = "orderBy")]
    pub order_by: Option<String>,
    #[serde(default)]
    pub order: Option<SortOrder>,
    /// OFFSET; zero is treated as absent
    #[serde(default)]
    pub skip: Option<u64>,
    /// LIMIT; zero is treated as absent
    #[serde(default)]
    pub limit: Option<u64>,
    /// Raw SQL appended verbatim after ORDER BY. Never pass untrusted input here.
    #[serde(default)]
    pub extra: Option<String>,
    /// RETURNING column list for update (defaults to `id`)
    #[serde(default, rename = "return")]
    pub returning: Option<String>,
}

impl QueryOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the filter.
    pub fn filter(mut self, filter: impl Into<Filter>) -> Self {
        self.filter = filter.into();
        self
    }

    /// Append a condition to the filter (AND, or OR if the condition says so).
    pub fn and_where(mut self, condition: Condition) -> Self {
        self.filter.push(condition);
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some(column.into());
        self.order = Some(order);
        self
    }

    pub fn skip(mut self, n: u64) -> Self {
        self.skip = Some(n);
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn extra(mut self, sql: impl Into<String>) -> Self {
        self.extra = Some(sql.into());
        self
    }

    pub fn returning(mut self, columns: impl Into<String>) -> Self {
        self.returning = Some(columns.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_option_object() {
        let opts: QueryOptions = serde_json::from_value(json!({
            "where": {"col": "id", "val": 1},
            "orderBy": "created_at",
            "order": "desc",
            "skip": 20,
            "limit": 10,
            "return": "id,name"
        }))
        .unwrap();

        assert_eq!(opts.filter.len(), 1);
        assert_eq!(opts.order_by.as_deref(), Some("created_at"));
        assert_eq!(opts.order, Some(SortOrder::Desc));
        assert_eq!(opts.skip, Some(20));
        assert_eq!(opts.limit, Some(10));
        assert_eq!(opts.returning.as_deref(), Some("id,name"));
        assert!(opts.extra.is_none());
    }

    #[test]
    fn empty_object_is_default() {
        let opts: QueryOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(opts, QueryOptions::default());
    }

    #[test]
    fn builder_chains() {
        let opts = QueryOptions::new()
            .and_where(Condition::eq("a", 1))
            .and_where(Condition::eq("b", 2).or())
            .order_by("name", SortOrder::Asc)
            .limit(5);
        assert_eq!(opts.filter.len(), 2);
        assert_eq!(opts.order.map(SortOrder::as_sql), Some("ASC"));
    }
}

//! Declared column types, for casting bound parameters.
//!
//! Parameters travel with the type of their value (text, int8, bool,
//! jsonb). Postgres will not put a text parameter into a `uuid` or
//! `timestamptz` column, nor compare an int8 with a `varchar`, so the
//! placeholder for a column whose type is known is written `$n::type` and
//! the server converts the bound value itself.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::value::SqlValue;

/// `int4`, `_text`, `public.citext`, `"Mood"`, `app."Mood"`
static TYPE_NAME_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^(?:[a-z_][a-z0-9_]*|"[^"]+")(?:\.(?:[a-z_][a-z0-9_]*|"[^"]+"))?$"#).unwrap()
});

/// Column name to cast type for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnTypes {
    types: BTreeMap<String, String>,
}

impl ColumnTypes {
    pub const fn new() -> Self {
        Self {
            types: BTreeMap::new(),
        }
    }

    /// Record the cast type of `column`. Returns false (and records
    /// nothing) when `type_name` is not a plain or quoted type name with at
    /// most one schema qualifier.
    pub fn insert(&mut self, column: impl Into<String>, type_name: impl Into<String>) -> bool {
        let type_name = type_name.into();
        if !TYPE_NAME_PATTERN.is_match(&type_name) {
            return false;
        }
        self.types.insert(column.into(), type_name);
        true
    }

    pub fn with(mut self, column: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.insert(column, type_name);
        self
    }

    pub fn get(&self, column: &str) -> Option<&str> {
        self.types.get(column).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Placeholder `$n` for `value` bound against `column`.
    ///
    /// Text, integer, boolean and JSON values are cast to the column's
    /// type. NULL stays untyped so the server infers it. Floats and
    /// temporal values are left alone: they already compare with and
    /// assign to their whole type family, and a cast could truncate them
    /// (`1.5::int4`, a timestamp cast to `date`).
    pub fn placeholder(&self, column: &str, n: usize, value: &SqlValue) -> String {
        let casts = matches!(
            value,
            SqlValue::Text(_) | SqlValue::Int(_) | SqlValue::Bool(_) | SqlValue::Json(_)
        );
        match self.get(column) {
            Some(type_name) if casts => format!("${}::{}", n, type_name),
            _ => format!("${}", n),
        }
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for ColumnTypes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut types = Self::new();
        for (column, type_name) in iter {
            types.insert(column, type_name);
        }
        types
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strings_for_typed_columns_are_cast() {
        let types = ColumnTypes::new()
            .with("id", "uuid")
            .with("seen_at", "timestamptz")
            .with("code", "varchar");

        assert_eq!(types.placeholder("id", 1, &SqlValue::from("9b2c")), "$1::uuid");
        assert_eq!(
            types.placeholder("seen_at", 2, &SqlValue::from("2024-05-01 10:00:00+02")),
            "$2::timestamptz"
        );
        // int8 against varchar has no operator without the cast
        assert_eq!(types.placeholder("code", 3, &SqlValue::Int(42)), "$3::varchar");
    }

    #[test]
    fn null_float_and_unknown_columns_stay_bare() {
        let types = ColumnTypes::new().with("a", "int4").with("d", "date");
        assert_eq!(types.placeholder("a", 1, &SqlValue::Null), "$1");
        assert_eq!(types.placeholder("a", 2, &SqlValue::Float(1.5)), "$2");
        assert_eq!(types.placeholder("missing", 3, &SqlValue::from("x")), "$3");

        let ts = chrono::NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(23, 0, 0)
            .unwrap();
        assert_eq!(types.placeholder("d", 4, &SqlValue::LocalTimestamp(ts)), "$4");
    }

    #[test]
    fn only_type_names_are_accepted() {
        let mut types = ColumnTypes::new();
        assert!(types.insert("a", "_int4"));
        assert!(types.insert("b", "public.citext"));
        assert!(types.insert("c", r#"app."Mood""#));
        assert!(!types.insert("d", "int4; DROP TABLE t"));
        assert!(!types.insert("e", "timestamp with time zone"));
        assert!(!types.insert("f", "Upper"));
        assert_eq!(types.len(), 3);
        assert_eq!(types.get("d"), None);
    }
}

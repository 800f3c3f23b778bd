//! Filter compiler - structured conditions to a parameterized WHERE clause.
//!
//! Placeholders are numbered from the current length of the caller's
//! parameter list, so a clause compiled after an UPDATE's SET list (or
//! before a soft-delete predicate) continues the same `$N` sequence.

use serde::{Deserialize, Deserializer};
use serde_json::Value as JsonValue;

use crate::error::{Error, Result};
use crate::spec::is_qualified_identifier;
use crate::types::ColumnTypes;
use crate::value::SqlValue;

/// Operators accepted in a condition (compared case-insensitively).
const OPERATORS: &[&str] = &[
    "=", "!=", "<>", "<", "<=", ">", ">=", "LIKE", "ILIKE", "NOT LIKE", "NOT ILIKE",
];

/// Compact operators recognised by [`Condition::parse_expr`], longest first.
const EXPR_OPERATORS: &[(&str, &str)] = &[
    ("!~~", "NOT LIKE"),
    ("~~", "LIKE"),
    (">=", ">="),
    ("<=", "<="),
    ("!=", "!="),
    ("<>", "<>"),
    ("=", "="),
    ("<", "<"),
    (">", ">"),
];

/// How a condition joins the one before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connective {
    #[default]
    And,
    Or,
}

impl Connective {
    fn as_sql(self) -> &'static str {
        match self {
            Connective::And => " AND ",
            Connective::Or => " OR ",
        }
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FilterValue {
    /// `col IS NULL`
    #[default]
    Null,
    /// `col IS NOT NULL`
    NotNull,
    Value(SqlValue),
}

impl FilterValue {
    /// Map a JSON value, honouring the `"null"` / `"notnull"` / `"not_null"` markers.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => FilterValue::Null,
            JsonValue::String(s) if s == "null" => FilterValue::Null,
            JsonValue::String(s) if s == "notnull" || s == "not_null" => FilterValue::NotNull,
            other => FilterValue::Value(other.into()),
        }
    }
}

impl From<SqlValue> for FilterValue {
    fn from(value: SqlValue) -> Self {
        match value {
            SqlValue::Null => FilterValue::Null,
            v => FilterValue::Value(v),
        }
    }
}

impl<'de> Deserialize<'de> for FilterValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(FilterValue::from_json)
    }
}

fn default_operator() -> String {
    "=".to_string()
}

/// One `WHERE` condition.
///
/// Deserializes from `{"type": "and"|"or", "col": ..., "op": ..., "val": ...}`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Condition {
    /// Ignored for the first condition of a clause
    #[serde(default, rename = "type")]
    pub connective: Connective,
    #[serde(rename = "col")]
    pub column: String,
    #[serde(default = "default_operator", rename = "op")]
    pub operator: String,
    #[serde(default, rename = "val")]
    pub value: FilterValue,
}

impl Condition {
    /// `column <operator> value`; a NULL value renders as `IS NULL`.
    pub fn new(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<SqlValue>,
    ) -> Self {
        Self::with_value(column, operator, FilterValue::from(value.into()))
    }

    pub fn with_value(
        column: impl Into<String>,
        operator: impl Into<String>,
        value: FilterValue,
    ) -> Self {
        Self {
            connective: Connective::And,
            column: column.into(),
            operator: operator.into(),
            value,
        }
    }

    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Self::new(column, "=", value)
    }

    pub fn is_null(column: impl Into<String>) -> Self {
        Self::with_value(column, "=", FilterValue::Null)
    }

    pub fn not_null(column: impl Into<String>) -> Self {
        Self::with_value(column, "=", FilterValue::NotNull)
    }

    /// Join this condition to the previous one with OR.
    pub fn or(mut self) -> Self {
        self.connective = Connective::Or;
        self
    }

    /// Parse the compact `col<op>value` form, e.g. `age>=18`, `name~~%bob%`,
    /// `deleted_at=null`.
    ///
    /// `~~` is LIKE and `!~~` is NOT LIKE. Values that look like integers,
    /// floats or booleans are typed accordingly; single quotes force text.
    pub fn parse_expr(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let (pos, token, operator) = EXPR_OPERATORS
            .iter()
            .filter_map(|(tok, op)| expr.find(tok).map(|pos| (pos, *tok, *op)))
            // earliest match wins, longer token breaks ties (`>=` over `>`)
            .min_by(|a, b| a.0.cmp(&b.0).then(b.1.len().cmp(&a.1.len())))
            .ok_or_else(|| Error::malformed_filter(expr, "no comparison operator"))?;

        let column = expr[..pos].trim();
        let raw = expr[pos + token.len()..].trim();
        if column.is_empty() {
            return Err(Error::malformed_filter(expr, "missing column"));
        }

        let value = match raw {
            "null" => FilterValue::Null,
            "notnull" | "not_null" => FilterValue::NotNull,
            _ => FilterValue::Value(parse_literal(raw)),
        };
        Ok(Self::with_value(column, operator, value))
    }

    /// Render this condition, pushing its value (if any) onto `params`.
    fn render(
        &self,
        params: &mut Vec<SqlValue>,
        qualifier: Option<&str>,
        types: &ColumnTypes,
    ) -> Result<String> {
        if !is_qualified_identifier(&self.column) {
            return Err(Error::malformed_filter(&self.column, "invalid column name"));
        }
        let column = match qualifier {
            Some(table) if !self.column.contains('.') => format!("{}.{}", table, self.column),
            _ => self.column.clone(),
        };

        Ok(match &self.value {
            FilterValue::Null => format!("{} IS NULL", column),
            FilterValue::NotNull => format!("{} IS NOT NULL", column),
            FilterValue::Value(v) => {
                let op = normalize_operator(&self.operator)
                    .ok_or_else(|| {
                        Error::malformed_filter(
                            &self.column,
                            format!("unsupported operator '{}'", self.operator),
                        )
                    })?;
                params.push(v.clone());
                let placeholder = if op.contains("LIKE") {
                    format!("${}", params.len())
                } else {
                    types.placeholder(&self.column, params.len(), v)
                };
                format!("{} {} {}", column, op, placeholder)
            }
        })
    }
}

fn normalize_operator(op: &str) -> Option<String> {
    let op = if op.trim().is_empty() {
        "=".to_string()
    } else {
        op.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_uppercase()
    };
    OPERATORS.contains(&op.as_str()).then_some(op)
}

fn parse_literal(raw: &str) -> SqlValue {
    if let Some(text) = raw.strip_prefix('\'').and_then(|r| r.strip_suffix('\'')) {
        return SqlValue::Text(text.to_owned());
    }
    if let Ok(n) = raw.parse::<i64>() {
        return SqlValue::Int(n);
    }
    if let Ok(f) = raw.parse::<f64>() {
        if f.is_finite() {
            return SqlValue::Float(f);
        }
    }
    match raw {
        "true" => SqlValue::Bool(true),
        "false" => SqlValue::Bool(false),
        _ => SqlValue::Text(raw.to_owned()),
    }
}

/// An ordered list of conditions. Deserializes from a single condition
/// object or an array of them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a condition joined with AND.
    pub fn and(mut self, condition: Condition) -> Self {
        self.conditions.push(Condition {
            connective: Connective::And,
            ..condition
        });
        self
    }

    /// Append a condition joined with OR.
    pub fn or(mut self, condition: Condition) -> Self {
        self.conditions.push(condition.or());
        self
    }

    pub fn push(&mut self, condition: Condition) {
        self.conditions.push(condition);
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    pub fn conditions(&self) -> &[Condition] {
        &self.conditions
    }

    /// Any condition after the first is joined with OR.
    pub fn has_disjunction(&self) -> bool {
        self.conditions
            .iter()
            .skip(1)
            .any(|c| c.connective == Connective::Or)
    }

    /// Compile to `" WHERE ..."` (or `""` when empty), appending bound values
    /// to `params` in emission order.
    ///
    /// With a `qualifier`, unqualified columns are prefixed `qualifier.`.
    /// On error `params` is left as it was.
    pub fn compile(&self, params: &mut Vec<SqlValue>, qualifier: Option<&str>) -> Result<String> {
        self.compile_typed(params, qualifier, &ColumnTypes::new())
    }

    /// [`compile`](Self::compile), casting each value to its column's
    /// declared type where `types` knows it.
    pub fn compile_typed(
        &self,
        params: &mut Vec<SqlValue>,
        qualifier: Option<&str>,
        types: &ColumnTypes,
    ) -> Result<String> {
        Ok(match self.predicate(params, qualifier, types)? {
            Some(predicate) => format!(" WHERE {}", predicate),
            None => String::new(),
        })
    }

    /// The bare boolean expression, without the `WHERE` keyword.
    pub(crate) fn predicate(
        &self,
        params: &mut Vec<SqlValue>,
        qualifier: Option<&str>,
        types: &ColumnTypes,
    ) -> Result<Option<String>> {
        if self.conditions.is_empty() {
            return Ok(None);
        }

        let mark = params.len();
        let mut out = String::new();
        for (idx, condition) in self.conditions.iter().enumerate() {
            if idx > 0 {
                out.push_str(condition.connective.as_sql());
            }
            match condition.render(params, qualifier, types) {
                Ok(sql) => out.push_str(&sql),
                Err(err) => {
                    params.truncate(mark);
                    return Err(err);
                }
            }
        }
        Ok(Some(out))
    }
}

impl From<Condition> for Filter {
    fn from(condition: Condition) -> Self {
        Self {
            conditions: vec![condition],
        }
    }
}

impl From<Vec<Condition>> for Filter {
    fn from(conditions: Vec<Condition>) -> Self {
        Self { conditions }
    }
}

impl FromIterator<Condition> for Filter {
    fn from_iter<I: IntoIterator<Item = Condition>>(iter: I) -> Self {
        Self {
            conditions: iter.into_iter().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(Condition),
            Many(Vec<Condition>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(c) => c.into(),
            OneOrMany::Many(cs) => cs.into(),
        })
    }
}

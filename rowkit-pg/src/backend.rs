//! The connection-pool seam.
//!
//! [`Backend`] is everything the engine needs from a pool: run a statement
//! and hand back typed rows, or run it and report the affected count.
//! `PgPool` implements it; tests substitute scripted backends.

use async_trait::async_trait;
use rowkit_core::SqlValue;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use serde_json::Value as JsonValue;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{
    PgArgumentBuffer, PgArguments, PgColumn, PgPool, PgRow, PgTypeInfo, PgTypeKind, Postgres,
};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo};

/// Declared type of a result column, as far as normalization cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    /// `timestamp with time zone`
    Timestamp,
    /// `timestamp without time zone`
    LocalTimestamp,
    Date,
    Other,
}

impl ColumnKind {
    /// Map a driver type name (`TIMESTAMPTZ`) or a catalog `data_type`
    /// (`timestamp with time zone`).
    pub fn from_type_name(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "timestamptz" | "timestamp with time zone" => ColumnKind::Timestamp,
            "timestamp" | "timestamp without time zone" => ColumnKind::LocalTimestamp,
            "date" => ColumnKind::Date,
            _ => ColumnKind::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMeta {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnMeta {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Raw rows as returned by a backend, before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    pub columns: Vec<ColumnMeta>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl ResultSet {
    pub fn new(columns: Vec<ColumnMeta>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_row(mut self, row: Vec<SqlValue>) -> Self {
        self.rows.push(row);
        self
    }
}

#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a statement that produces rows (SELECT, or DML with RETURNING).
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, sqlx::Error>;

    /// Run a statement for its affected-row count.
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error>;
}

#[async_trait]
impl Backend for PgPool {
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> Result<ResultSet, sqlx::Error> {
        let rows = bind_all(sqlx::query(sql), params).fetch_all(self).await?;
        let Some(first) = rows.first() else {
            return Ok(ResultSet::default());
        };

        let columns: Vec<ColumnMeta> = first
            .columns()
            .iter()
            .map(|c| ColumnMeta::new(c.name(), ColumnKind::from_type_name(c.type_info().name())))
            .collect();
        let mut set = ResultSet::new(columns);
        for row in &rows {
            set.rows.push(decode_row(row)?);
        }
        Ok(set)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64, sqlx::Error> {
        let result = bind_all(sqlx::query(sql), params).execute(self).await?;
        Ok(result.rows_affected())
    }
}

/// NULL bound with no declared type so the server infers one from context
/// (`COALESCE($1, col)`, `INSERT ... VALUES($1)` into any column type).
struct UntypedNull;

impl sqlx::Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl<'q> sqlx::Encode<'q, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

fn bind_all<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    params: &[SqlValue],
) -> Query<'q, Postgres, PgArguments> {
    for value in params {
        query = match value.clone() {
            SqlValue::Null => query.bind(UntypedNull),
            SqlValue::Bool(b) => query.bind(b),
            SqlValue::Int(n) => query.bind(n),
            SqlValue::Float(f) => query.bind(f),
            SqlValue::Text(s) => query.bind(s),
            SqlValue::Timestamp(ts) => query.bind(ts),
            SqlValue::LocalTimestamp(ts) => query.bind(ts),
            SqlValue::Date(d) => query.bind(d),
            SqlValue::Json(v) => query.bind(sqlx::types::Json(v)),
        };
    }
    query
}

fn decode_row(row: &PgRow) -> Result<Vec<SqlValue>, sqlx::Error> {
    row.columns().iter().map(|col| decode_cell(row, col)).collect()
}

/// Decode one cell into the value callers see.
///
/// Types without a mapping here are an error naming the column; cast them
/// to text in the statement (`inet_col::text`) to read them.
fn decode_cell(row: &PgRow, col: &PgColumn) -> Result<SqlValue, sqlx::Error> {
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};

    let idx = col.ordinal();
    let value: SqlValue = match col.type_info().name() {
        "BOOL" => row.try_get::<Option<bool>, _>(idx)?.into(),
        "INT2" => row.try_get::<Option<i16>, _>(idx)?.into(),
        "INT4" => row.try_get::<Option<i32>, _>(idx)?.into(),
        "INT8" => row.try_get::<Option<i64>, _>(idx)?.into(),
        "OID" => row.try_get::<Option<Oid>, _>(idx)?.map(|o| o.0).into(),
        "FLOAT4" => row.try_get::<Option<f32>, _>(idx)?.into(),
        "FLOAT8" => row.try_get::<Option<f64>, _>(idx)?.into(),
        // decimal text, like most drivers hand NUMERIC to callers
        "NUMERIC" => row
            .try_get::<Option<rust_decimal::Decimal>, _>(idx)?
            .map(|d| d.to_string())
            .into(),
        "TEXT" | "VARCHAR" | "BPCHAR" | "NAME" => {
            row.try_get::<Option<String>, _>(idx)?.into()
        }
        "UUID" => row
            .try_get::<Option<uuid::Uuid>, _>(idx)?
            .map(|u| u.to_string())
            .into(),
        "JSON" | "JSONB" => row
            .try_get::<Option<JsonValue>, _>(idx)?
            .map(SqlValue::Json)
            .unwrap_or(SqlValue::Null),
        "TIMESTAMPTZ" => row.try_get::<Option<DateTime<Utc>>, _>(idx)?.into(),
        "TIMESTAMP" => row.try_get::<Option<NaiveDateTime>, _>(idx)?.into(),
        "DATE" => row.try_get::<Option<NaiveDate>, _>(idx)?.into(),
        "TIME" => row
            .try_get::<Option<NaiveTime>, _>(idx)?
            .map(|t| t.to_string())
            .into(),
        "INTERVAL" => row
            .try_get::<Option<PgInterval>, _>(idx)?
            .map(|i| format_interval(&i))
            .into(),
        "BYTEA" => row
            .try_get::<Option<Vec<u8>>, _>(idx)?
            .map(|bytes| format_bytea(&bytes))
            .into(),
        "VOID" => SqlValue::Null,
        "BOOL[]" => decode_array::<bool>(row, idx, SqlValue::from)?,
        "INT2[]" => decode_array::<i16>(row, idx, SqlValue::from)?,
        "INT4[]" => decode_array::<i32>(row, idx, SqlValue::from)?,
        "INT8[]" => decode_array::<i64>(row, idx, SqlValue::from)?,
        "FLOAT4[]" => decode_array::<f32>(row, idx, SqlValue::from)?,
        "FLOAT8[]" => decode_array::<f64>(row, idx, SqlValue::from)?,
        "NUMERIC[]" => {
            decode_array::<rust_decimal::Decimal>(row, idx, |d| d.to_string().into())?
        }
        "TEXT[]" | "VARCHAR[]" | "BPCHAR[]" | "NAME[]" => {
            decode_array::<String>(row, idx, SqlValue::from)?
        }
        "UUID[]" => decode_array::<uuid::Uuid>(row, idx, |u| u.to_string().into())?,
        "JSON[]" | "JSONB[]" => decode_array::<JsonValue>(row, idx, SqlValue::Json)?,
        "DATE[]" => decode_array::<NaiveDate>(row, idx, |d| d.to_string().into())?,
        // enum and citext values travel as their text, in either format
        _ if is_textual(col.type_info()) => {
            row.try_get_unchecked::<Option<String>, _>(idx)?.into()
        }
        other => {
            return Err(sqlx::Error::ColumnDecode {
                index: col.name().to_owned(),
                source: format!("unsupported column type {}; cast it to text", other).into(),
            })
        }
    };
    Ok(value)
}

fn is_textual(type_info: &PgTypeInfo) -> bool {
    matches!(type_info.kind(), PgTypeKind::Enum(_))
        || type_info.name().eq_ignore_ascii_case("citext")
}

/// A Postgres array as a JSON array, NULL elements included.
fn decode_array<T>(
    row: &PgRow,
    idx: usize,
    item: impl Fn(T) -> SqlValue,
) -> Result<SqlValue, sqlx::Error>
where
    Vec<Option<T>>: for<'r> sqlx::Decode<'r, Postgres> + sqlx::Type<Postgres>,
{
    Ok(match row.try_get::<Option<Vec<Option<T>>>, _>(idx)? {
        Some(items) => SqlValue::Json(
            items
                .into_iter()
                .map(|v| v.map(&item).map_or(JsonValue::Null, SqlValue::into_json))
                .collect(),
        ),
        None => SqlValue::Null,
    })
}

/// The server's default `IntervalStyle` rendering: `1 year 2 mons 3 days 04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    fn unit(n: i64, name: &str) -> String {
        if n == 1 {
            format!("1 {}", name)
        } else {
            format!("{} {}s", n, name)
        }
    }

    let mut parts = Vec::new();
    let (years, months) = (interval.months / 12, interval.months % 12);
    if years != 0 {
        parts.push(unit(years.into(), "year"));
    }
    if months != 0 {
        parts.push(unit(months.into(), "mon"));
    }
    if interval.days != 0 {
        parts.push(unit(interval.days.into(), "day"));
    }

    let micros = interval.microseconds;
    if micros != 0 || parts.is_empty() {
        let sign = if micros < 0 { "-" } else { "" };
        let micros = micros.unsigned_abs();
        let secs = micros / 1_000_000;
        let mut time = format!(
            "{}{:02}:{:02}:{:02}",
            sign,
            secs / 3600,
            secs / 60 % 60,
            secs % 60
        );
        let frac = micros % 1_000_000;
        if frac != 0 {
            let digits = format!("{:06}", frac);
            time.push('.');
            time.push_str(digits.trim_end_matches('0'));
        }
        parts.push(time);
    }
    parts.join(" ")
}

/// Hex form, as the server prints `bytea` by default.
fn format_bytea(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_from_driver_and_catalog_names() {
        assert_eq!(ColumnKind::from_type_name("TIMESTAMPTZ"), ColumnKind::Timestamp);
        assert_eq!(
            ColumnKind::from_type_name("timestamp with time zone"),
            ColumnKind::Timestamp
        );
        assert_eq!(
            ColumnKind::from_type_name("timestamp without time zone"),
            ColumnKind::LocalTimestamp
        );
        assert_eq!(ColumnKind::from_type_name("DATE"), ColumnKind::Date);
        assert_eq!(ColumnKind::from_type_name("TEXT"), ColumnKind::Other);
        assert_eq!(ColumnKind::from_type_name("INT4"), ColumnKind::Other);
    }

    #[test]
    fn intervals_render_like_the_server() {
        let iv = |months, days, microseconds| PgInterval {
            months,
            days,
            microseconds,
        };
        assert_eq!(
            format_interval(&iv(14, 3, 14_706_000_000)),
            "1 year 2 mons 3 days 04:05:06"
        );
        assert_eq!(format_interval(&iv(0, 1, 0)), "1 day");
        assert_eq!(format_interval(&iv(0, 0, 0)), "00:00:00");
        assert_eq!(format_interval(&iv(0, -2, -1_500_000)), "-2 days -00:00:01.5");
    }

    #[test]
    fn bytea_is_hex() {
        assert_eq!(format_bytea(&[0xde, 0xad, 0x01]), "\\xdead01");
        assert_eq!(format_bytea(&[]), "\\x");
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn arrays_and_intervals_decode_unknown_types_fail() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool creation failed");

        let set = pool
            .fetch(
                "SELECT ARRAY[1, NULL, 3]::int4[] AS ints, ARRAY['a', 'b']::text[] AS words, \
                 '1 day 02:00'::interval AS span",
                &[],
            )
            .await
            .expect("query failed");
        assert_eq!(set.rows[0][0], SqlValue::Json(serde_json::json!([1, null, 3])));
        assert_eq!(set.rows[0][1], SqlValue::Json(serde_json::json!(["a", "b"])));
        assert_eq!(set.rows[0][2], SqlValue::from("1 day 02:00:00"));

        // never raw wire bytes, never a silent NULL
        let err = pool
            .fetch("SELECT '10.0.0.1'::inet AS addr", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, sqlx::Error::ColumnDecode { ref index, .. } if index == "addr"));
        let set = pool
            .fetch("SELECT '10.0.0.1'::inet::text AS addr", &[])
            .await
            .expect("query failed");
        assert_eq!(set.rows[0][0], SqlValue::from("10.0.0.1/32"));
    }

    #[tokio::test]
    #[ignore = "requires database"]
    async fn pool_round_trips_typed_values() {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
        let pool = PgPool::connect(&url).await.expect("pool creation failed");

        let set = pool
            .fetch(
                "SELECT $1::int8 AS n, $2::text AS s, COALESCE($3, 'fallback') AS c, now() AS t",
                &[SqlValue::Int(7), SqlValue::from("x"), SqlValue::Null],
            )
            .await
            .expect("query failed");

        assert_eq!(set.columns[3].kind, ColumnKind::Timestamp);
        assert_eq!(set.rows[0][0], SqlValue::Int(7));
        assert_eq!(set.rows[0][1], SqlValue::from("x"));
        assert_eq!(set.rows[0][2], SqlValue::from("fallback"));
    }
}

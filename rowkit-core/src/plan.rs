//! Query assembly - one parameterized statement per operation.
//!
//! Every function here is pure: schema facts the statement depends on
//! (soft-delete column, auto-stamped update column, declared column types)
//! are passed in by the caller, which looks them up through the schema
//! introspector.

use crate::error::{Error, Result};
use crate::filter::Filter;
use crate::options::QueryOptions;
use crate::spec::{is_identifier, is_qualified_identifier, ColumnSpec};
use crate::types::ColumnTypes;
use crate::value::{Record, SqlValue};

/// Column whose non-NULL value marks a row as logically deleted.
pub const SOFT_DELETE_COLUMN: &str = "deleted_at";

/// Column stamped with `NOW()` by every update when the table has it.
pub const UPDATED_AT_COLUMN: &str = "updated_at";

const DEFAULT_RETURNING: &str = "id";

/// A statement ready to execute. `$N` in `sql` binds `params[N - 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub sql: String,
    pub params: Vec<SqlValue>,
    /// Schema-catalog lookup issued on behalf of another operation
    pub catalog: bool,
}

impl QueryPlan {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
            catalog: false,
        }
    }

    /// Number of distinct `$N` placeholders in the statement text.
    pub fn placeholder_count(&self) -> usize {
        let bytes = self.sql.as_bytes();
        let mut seen = std::collections::BTreeSet::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'$' {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start {
                    seen.insert(&self.sql[start..end]);
                }
                i = end.max(start);
            } else {
                i += 1;
            }
        }
        seen.len()
    }
}

impl std::fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql)?;
        if !self.params.is_empty() {
            let params: Vec<String> = self.params.iter().map(ToString::to_string).collect();
            write!(f, " -- [{}]", params.join(", "))?;
        }
        Ok(())
    }
}

/// Schema facts about the target table that change the generated SQL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TableInfo {
    /// Table has a `deleted_at` column
    pub soft_delete: bool,
    /// Table has an `updated_at` column
    pub updated_at: bool,
    /// Cast types for the table's own columns
    pub column_types: ColumnTypes,
}

fn check_table(table: &str) -> Result<()> {
    if is_qualified_identifier(table) {
        Ok(())
    } else {
        Err(Error::malformed_spec(table, "invalid table name"))
    }
}

/// `RETURNING` list: a plain column spec (no joins), `id` when absent.
fn returning_list(returning: Option<&str>) -> Result<String> {
    let spec = ColumnSpec::parse(returning.unwrap_or_default())?;
    if spec.is_empty() {
        return Ok(DEFAULT_RETURNING.to_string());
    }
    if spec.has_joins() {
        return Err(Error::malformed_spec(
            returning.unwrap_or_default(),
            "joins are not allowed in a RETURNING list",
        ));
    }
    Ok(spec.select_list(""))
}

/// WHERE clause for reads and updates: the caller's filter, then the
/// soft-delete predicate when the table has one.
///
/// A filter containing OR is parenthesized so the soft-delete predicate
/// applies to every branch.
fn where_clause(
    filter: &Filter,
    params: &mut Vec<SqlValue>,
    qualifier: Option<&str>,
    info: &TableInfo,
) -> Result<String> {
    let predicate = filter.predicate(params, qualifier, &info.column_types)?;
    if !info.soft_delete {
        return Ok(predicate.map(|p| format!(" WHERE {}", p)).unwrap_or_default());
    }

    let marker = match qualifier {
        Some(table) => format!("{}.{} IS NULL", table, SOFT_DELETE_COLUMN),
        None => format!("{} IS NULL", SOFT_DELETE_COLUMN),
    };
    Ok(match predicate {
        None => format!(" WHERE {}", marker),
        Some(p) if filter.has_disjunction() => format!(" WHERE ({}) AND {}", p, marker),
        Some(p) => format!(" WHERE {} AND {}", p, marker),
    })
}

/// `SELECT <columns> FROM <table> [LEFT JOIN ...]* [WHERE ...] [ORDER BY ...] [extra] [OFFSET n] [LIMIT n]`
pub fn select(
    table: &str,
    columns: &ColumnSpec,
    options: &QueryOptions,
    info: &TableInfo,
) -> Result<QueryPlan> {
    check_table(table)?;
    if columns.is_empty() {
        return Err(Error::required("columns"));
    }

    let qualifier = columns.has_joins().then_some(table);
    let mut params = Vec::new();
    let mut sql = format!("SELECT {} FROM {}", columns.select_list(table), table);
    sql.push_str(&columns.join_clauses(table));
    sql.push_str(&where_clause(
        &options.filter,
        &mut params,
        qualifier,
        info,
    )?);

    if let Some(order_by) = options.order_by.as_deref().filter(|c| !c.is_empty()) {
        if !is_qualified_identifier(order_by) {
            return Err(Error::malformed_spec(order_by, "invalid ORDER BY column"));
        }
        let order = options.order.unwrap_or_default();
        sql.push_str(&format!(" ORDER BY {} {}", order_by, order.as_sql()));
    }
    if let Some(extra) = options.extra.as_deref().filter(|e| !e.trim().is_empty()) {
        sql.push(' ');
        sql.push_str(extra);
    }
    if let Some(skip) = options.skip.filter(|n| *n > 0) {
        sql.push_str(&format!(" OFFSET {}", skip));
    }
    if let Some(limit) = options.limit.filter(|n| *n > 0) {
        sql.push_str(&format!(" LIMIT {}", limit));
    }

    Ok(QueryPlan::new(sql, params))
}

/// `SELECT COUNT(<columns>|*) FROM <table> [WHERE ...] [extra]`
pub fn count(
    table: &str,
    columns: &ColumnSpec,
    options: &QueryOptions,
    info: &TableInfo,
) -> Result<QueryPlan> {
    check_table(table)?;
    if columns.has_joins() {
        return Err(Error::malformed_spec(
            columns.base_columns().join(","),
            "joins are not supported by count",
        ));
    }

    let target = if columns.is_empty() {
        "*".to_string()
    } else {
        columns.select_list(table)
    };
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT({}) FROM {}", target, table);
    sql.push_str(&where_clause(
        &options.filter,
        &mut params,
        None,
        info,
    )?);
    if let Some(extra) = options.extra.as_deref().filter(|e| !e.trim().is_empty()) {
        sql.push(' ');
        sql.push_str(extra);
    }

    Ok(QueryPlan::new(sql, params))
}

/// `INSERT INTO <table>(<keys>) VALUES($1, ...) RETURNING <columns>` for one row.
///
/// Values for columns with a declared type in `types` are cast to it.
pub fn insert(
    table: &str,
    row: &Record,
    returning: Option<&str>,
    types: &ColumnTypes,
) -> Result<QueryPlan> {
    check_table(table)?;
    if row.is_empty() {
        return Err(Error::required("data"));
    }

    let mut columns = Vec::with_capacity(row.len());
    let mut placeholders = Vec::with_capacity(row.len());
    let mut params = Vec::with_capacity(row.len());
    for (column, value) in row.iter() {
        if !is_identifier(column) {
            return Err(Error::malformed_spec(column, "invalid column name"));
        }
        params.push(value.clone());
        columns.push(column);
        placeholders.push(types.placeholder(column, params.len(), value));
    }

    let sql = format!(
        "INSERT INTO {}({}) VALUES({}) RETURNING {}",
        table,
        columns.join(", "),
        placeholders.join(", "),
        returning_list(returning)?
    );
    Ok(QueryPlan::new(sql, params))
}

/// `UPDATE <table> SET col=COALESCE($n, col), ...[, updated_at=NOW()] [WHERE ...] RETURNING ...`
///
/// A NULL value leaves its column unchanged, so partial records can be
/// passed straight through. There is no way to set a column to NULL here.
pub fn update(
    table: &str,
    data: &Record,
    options: &QueryOptions,
    info: &TableInfo,
) -> Result<QueryPlan> {
    check_table(table)?;

    let mut params = Vec::with_capacity(data.len());
    let mut assignments = Vec::with_capacity(data.len() + 1);
    for (column, value) in data.iter() {
        if !is_identifier(column) {
            return Err(Error::malformed_spec(column, "invalid column name"));
        }
        params.push(value.clone());
        let placeholder = info.column_types.placeholder(column, params.len(), value);
        assignments.push(format!("{}=COALESCE({}, {})", column, placeholder, column));
    }
    if info.updated_at && data.get(UPDATED_AT_COLUMN).is_none() {
        assignments.push(format!("{}=NOW()", UPDATED_AT_COLUMN));
    }
    if assignments.is_empty() {
        return Err(Error::required("data"));
    }

    let mut sql = format!("UPDATE {} SET {}", table, assignments.join(", "));
    sql.push_str(&where_clause(
        &options.filter,
        &mut params,
        None,
        info,
    )?);
    sql.push_str(" RETURNING ");
    sql.push_str(&returning_list(options.returning.as_deref())?);

    Ok(QueryPlan::new(sql, params))
}

/// `DELETE FROM <table> [WHERE ...]`. An empty filter deletes every row.
pub fn delete(table: &str, filter: &Filter, types: &ColumnTypes) -> Result<QueryPlan> {
    check_table(table)?;
    let mut params = Vec::new();
    let where_sql = filter.compile_typed(&mut params, None, types)?;
    let sql = format!("DELETE FROM {}{}", table, where_sql);
    Ok(QueryPlan::new(sql, params))
}

/// Split `schema.table` into its parts.
fn catalog_target(table: &str) -> (Option<&str>, &str) {
    match table.split_once('.') {
        Some((schema, name)) => (Some(schema), name),
        None => (None, table),
    }
}

/// Catalog lookup: one row when `table` has `column`, none otherwise.
pub fn column_exists(table: &str, column: &str) -> QueryPlan {
    let (schema, name) = catalog_target(table);
    let mut sql = String::from(
        "SELECT column_name::text AS column_name FROM information_schema.columns \
         WHERE table_name = $1 AND column_name = $2",
    );
    let mut params = vec![SqlValue::from(name), SqlValue::from(column)];
    if let Some(schema) = schema {
        sql.push_str(" AND table_schema = $3");
        params.push(SqlValue::from(schema));
    }
    QueryPlan {
        sql,
        params,
        catalog: true,
    }
}

/// Catalog lookup of every column of `table` with its declared type.
///
/// `udt_schema`/`udt_name` name the underlying type (`int4`, `_text`,
/// `public.citext`), which is what a cast needs.
pub fn table_columns(table: &str) -> QueryPlan {
    let (schema, name) = catalog_target(table);
    let mut sql = String::from(
        "SELECT column_name::text AS column_name, data_type::text AS data_type, \
         udt_schema::text AS udt_schema, udt_name::text AS udt_name \
         FROM information_schema.columns WHERE table_name = $1",
    );
    let mut params = vec![SqlValue::from(name)];
    if let Some(schema) = schema {
        sql.push_str(" AND table_schema = $2");
        params.push(SqlValue::from(schema));
    }
    sql.push_str(" ORDER BY ordinal_position");
    QueryPlan {
        sql,
        params,
        catalog: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use crate::options::SortOrder;

    fn spec(s: &str) -> ColumnSpec {
        ColumnSpec::parse(s).unwrap()
    }

    const SOFT: TableInfo = TableInfo {
        soft_delete: true,
        updated_at: false,
        column_types: ColumnTypes::new(),
    };

    #[test]
    fn select_with_join_matches_expected_statement() {
        let plan = select(
            "users",
            &spec("id,name,owner->org(org_id){org_name,org_country}"),
            &QueryOptions::default(),
            &TableInfo::default(),
        )
        .unwrap();

        assert_eq!(
            plan.sql,
            "SELECT users.id, users.name, org.org_name AS org_org_name, org.org_country AS org_org_country \
             FROM users LEFT JOIN org ON users.owner=org.org_id"
        );
        assert!(plan.params.is_empty());
    }

    #[test]
    fn select_soft_delete_without_filter_is_sole_where() {
        let plan = select("users", &spec("id,name"), &QueryOptions::default(), &SOFT).unwrap();
        assert_eq!(plan.sql, "SELECT id, name FROM users WHERE deleted_at IS NULL");

        // Options present but no filter must still produce a WHERE
        let opts = QueryOptions::new().limit(10);
        let plan = select("users", &spec("id"), &opts, &SOFT).unwrap();
        assert_eq!(plan.sql, "SELECT id FROM users WHERE deleted_at IS NULL LIMIT 10");
    }

    #[test]
    fn select_full_option_set_with_join() {
        let opts = QueryOptions::new()
            .and_where(Condition::eq("status", "active"))
            .and_where(Condition::new("org.org_country", "=", "VN"))
            .order_by("created_at", SortOrder::Desc)
            .extra("FOR UPDATE")
            .skip(20)
            .limit(10);
        let plan = select("users", &spec("id,owner->org(org_id){org_name}"), &opts, &SOFT).unwrap();

        assert_eq!(
            plan.sql,
            "SELECT users.id, org.org_name AS org_org_name FROM users \
             LEFT JOIN org ON users.owner=org.org_id \
             WHERE users.status = $1 AND org.org_country = $2 AND users.deleted_at IS NULL \
             ORDER BY created_at DESC FOR UPDATE OFFSET 20 LIMIT 10"
        );
        assert_eq!(
            plan.params,
            vec![SqlValue::from("active"), SqlValue::from("VN")]
        );
        assert_eq!(plan.placeholder_count(), plan.params.len());
    }

    #[test]
    fn select_order_defaults_to_asc_and_zero_paging_is_omitted() {
        let opts = QueryOptions {
            order_by: Some("name".into()),
            skip: Some(0),
            limit: Some(0),
            ..Default::default()
        };
        let plan = select("users", &spec("*"), &opts, &TableInfo::default()).unwrap();
        assert_eq!(plan.sql, "SELECT * FROM users ORDER BY name ASC");
    }

    #[test]
    fn soft_delete_guards_every_or_branch() {
        let opts = QueryOptions::new()
            .and_where(Condition::eq("a", 1))
            .and_where(Condition::eq("b", 2).or());
        let plan = select("t", &spec("id"), &opts, &SOFT).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT id FROM t WHERE (a = $1 OR b = $2) AND deleted_at IS NULL"
        );
    }

    #[test]
    fn select_rejects_bad_input() {
        let opts = QueryOptions::default();
        assert!(matches!(
            select("users", &ColumnSpec::default(), &opts, &SOFT),
            Err(Error::RequiredParameterMissing { .. })
        ));
        assert!(matches!(
            select("users; drop", &spec("id"), &opts, &SOFT),
            Err(Error::MalformedSpec { .. })
        ));
        let opts = QueryOptions::new().order_by("name; drop", SortOrder::Asc);
        assert!(select("users", &spec("id"), &opts, &SOFT).is_err());
    }

    #[test]
    fn count_shapes() {
        let plan = count("users", &ColumnSpec::default(), &QueryOptions::default(), &SOFT).unwrap();
        assert_eq!(plan.sql, "SELECT COUNT(*) FROM users WHERE deleted_at IS NULL");

        let opts = QueryOptions::new()
            .and_where(Condition::eq("org", 3))
            .order_by("id", SortOrder::Desc)
            .limit(4);
        let plan = count("users", &spec("id"), &opts, &TableInfo::default()).unwrap();
        assert_eq!(plan.sql, "SELECT COUNT(id) FROM users WHERE org = $1");

        let err = count("users", &spec("owner->org(id){name}"), &opts, &SOFT).unwrap_err();
        assert!(matches!(err, Error::MalformedSpec { .. }));
    }

    #[test]
    fn insert_numbers_each_value() {
        let row = Record::new().set("name", "x").set("age", 3).set("note", SqlValue::Null);
        let plan = insert("people", &row, None, &ColumnTypes::new()).unwrap();
        assert_eq!(
            plan.sql,
            "INSERT INTO people(name, age, note) VALUES($1, $2, $3) RETURNING id"
        );
        assert_eq!(plan.params.len(), 3);

        let plan = insert("people", &row, Some("id, name"), &ColumnTypes::new()).unwrap();
        assert!(plan.sql.ends_with("RETURNING id, name"));
    }

    #[test]
    fn insert_rejects_empty_and_bad_columns() {
        assert!(matches!(
            insert("t", &Record::new(), None, &ColumnTypes::new()),
            Err(Error::RequiredParameterMissing { .. })
        ));
        let row = Record::new().set("a) VALUES(1); --", 1);
        assert!(matches!(
            insert("t", &row, None, &ColumnTypes::new()),
            Err(Error::MalformedSpec { .. })
        ));
        let row = Record::new().set("a", 1);
        assert!(insert("t", &row, Some("x->y(z){w}"), &ColumnTypes::new()).is_err());
    }

    #[test]
    fn insert_casts_strings_to_declared_types() {
        let types = ColumnTypes::new()
            .with("id", "uuid")
            .with("seen_at", "timestamptz")
            .with("born", "date")
            .with("score", "numeric");
        let row = Record::new()
            .set("id", "0b6f1c9e-3c55-4e57-9d07-4b1c2b5f2a10")
            .set("seen_at", "2024-05-01T10:00:00+02:00")
            .set("born", "1990-07-14")
            .set("score", 2.5)
            .set("note", "free text");
        let plan = insert("visits", &row, None, &types).unwrap();
        assert_eq!(
            plan.sql,
            "INSERT INTO visits(id, seen_at, born, score, note) \
             VALUES($1::uuid, $2::timestamptz, $3::date, $4, $5) RETURNING id"
        );
        assert_eq!(plan.placeholder_count(), plan.params.len());
    }

    #[test]
    fn update_casts_set_values_and_filter() {
        let info = TableInfo {
            soft_delete: true,
            column_types: ColumnTypes::new()
                .with("id", "uuid")
                .with("code", "varchar")
                .with("at", "timestamptz"),
            ..Default::default()
        };
        let data = Record::new().set("code", 42).set("at", SqlValue::Null);
        let opts = QueryOptions::new()
            .and_where(Condition::eq("id", "0b6f1c9e-3c55-4e57-9d07-4b1c2b5f2a10"));
        let plan = update("t", &data, &opts, &info).unwrap();
        assert_eq!(
            plan.sql,
            "UPDATE t SET code=COALESCE($1::varchar, code), at=COALESCE($2, at) \
             WHERE id = $3::uuid AND deleted_at IS NULL RETURNING id"
        );

        let plan = select("t", &spec("id"), &opts, &info).unwrap();
        assert_eq!(
            plan.sql,
            "SELECT id FROM t WHERE id = $1::uuid AND deleted_at IS NULL"
        );
        let plan = delete("t", &opts.filter, &info.column_types).unwrap();
        assert_eq!(plan.sql, "DELETE FROM t WHERE id = $1::uuid");
    }

    #[test]
    fn update_uses_coalesce_and_continues_numbering() {
        let data = Record::new().set("a", SqlValue::Null).set("b", "x");
        let opts = QueryOptions::new()
            .and_where(Condition::eq("id", 9))
            .returning("id,a,b");
        let info = TableInfo {
            soft_delete: true,
            updated_at: true,
            ..Default::default()
        };
        let plan = update("t", &data, &opts, &info).unwrap();

        assert_eq!(
            plan.sql,
            "UPDATE t SET a=COALESCE($1, a), b=COALESCE($2, b), updated_at=NOW() \
             WHERE id = $3 AND deleted_at IS NULL RETURNING id, a, b"
        );
        assert_eq!(
            plan.params,
            vec![SqlValue::Null, SqlValue::from("x"), SqlValue::Int(9)]
        );
    }

    #[test]
    fn update_without_filter_or_stamp() {
        let data = Record::new().set("a", 1);
        let plan = update("t", &data, &QueryOptions::default(), &TableInfo::default()).unwrap();
        assert_eq!(plan.sql, "UPDATE t SET a=COALESCE($1, a) RETURNING id");
    }

    #[test]
    fn update_explicit_stamp_is_not_duplicated() {
        let data = Record::new().set("updated_at", "2024-01-01 00:00:00");
        let info = TableInfo {
            soft_delete: false,
            updated_at: true,
            ..Default::default()
        };
        let plan = update("t", &data, &QueryOptions::default(), &info).unwrap();
        assert_eq!(
            plan.sql,
            "UPDATE t SET updated_at=COALESCE($1, updated_at) RETURNING id"
        );
    }

    #[test]
    fn update_with_nothing_to_set() {
        let err = update("t", &Record::new(), &QueryOptions::default(), &TableInfo::default())
            .unwrap_err();
        assert!(matches!(err, Error::RequiredParameterMissing { .. }));

        // The auto stamp alone is a valid update
        let info = TableInfo {
            soft_delete: false,
            updated_at: true,
            ..Default::default()
        };
        let plan = update("t", &Record::new(), &QueryOptions::default(), &info).unwrap();
        assert_eq!(plan.sql, "UPDATE t SET updated_at=NOW() RETURNING id");
    }

    #[test]
    fn delete_with_and_without_filter() {
        let plan = delete("t", &Filter::from(Condition::eq("id", 1)), &ColumnTypes::new()).unwrap();
        assert_eq!(plan.sql, "DELETE FROM t WHERE id = $1");
        assert_eq!(plan.params, vec![SqlValue::Int(1)]);

        let plan = delete("t", &Filter::new(), &ColumnTypes::new()).unwrap();
        assert_eq!(plan.sql, "DELETE FROM t");
    }

    #[test]
    fn catalog_queries_are_parameterized() {
        let plan = column_exists("users", "deleted_at");
        assert!(plan.catalog);
        assert_eq!(
            plan.params,
            vec![SqlValue::from("users"), SqlValue::from("deleted_at")]
        );
        assert!(!plan.sql.contains("users"));

        let plan = column_exists("auth.users", "deleted_at");
        assert_eq!(plan.params.len(), 3);
        assert!(plan.sql.ends_with("table_schema = $3"));

        let plan = table_columns("auth.users");
        assert!(plan.sql.contains("udt_schema::text AS udt_schema, udt_name::text AS udt_name"));
        assert_eq!(plan.params, vec![SqlValue::from("users"), SqlValue::from("auth")]);
        assert_eq!(plan.placeholder_count(), 2);
    }

    #[test]
    fn placeholder_count_ignores_repeats_and_dollars() {
        let plan = QueryPlan::new("SELECT $1, $1, $2, '$' FROM t", vec![]);
        assert_eq!(plan.placeholder_count(), 2);
    }
}

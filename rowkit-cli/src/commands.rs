//! Subcommand arguments and their runners.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Subcommand};
use rowkit_core::plan::{self, TableInfo};
use rowkit_core::{
    ColumnSpec, ColumnTypes, Condition, Filter, QueryOptions, QueryPlan, Record, SortOrder,
};
use rowkit_pg::{Db, Rows};
use serde_json::{json, Value as JsonValue};

#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Filter condition such as `age>=18`, `name~~%bob%` or `deleted_at=null` (repeatable)
    #[arg(long = "where", short = 'w', value_name = "EXPR")]
    pub conditions: Vec<String>,

    /// Join conditions with OR instead of AND
    #[arg(long)]
    pub or: bool,
}

impl FilterArgs {
    pub fn to_filter(&self) -> Result<Filter> {
        let mut filter = Filter::new();
        for (i, expr) in self.conditions.iter().enumerate() {
            let condition = Condition::parse_expr(expr)
                .with_context(|| format!("Invalid --where expression '{}'", expr))?;
            filter.push(if self.or && i > 0 {
                condition.or()
            } else {
                condition
            });
        }
        Ok(filter)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SelectArgs {
    /// Table to read from
    pub table: String,

    /// Column spec, e.g. `id,name,owner->org(org_id){org_name}`
    pub columns: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Column to sort by
    #[arg(long, value_name = "COLUMN")]
    pub order_by: Option<String>,

    /// Sort descending
    #[arg(long, requires = "order_by")]
    pub desc: bool,

    /// Rows to skip
    #[arg(long)]
    pub skip: Option<u64>,

    /// Maximum rows to return
    #[arg(long)]
    pub limit: Option<u64>,

    /// Raw SQL appended after ORDER BY (e.g. `FOR UPDATE`)
    #[arg(long, value_name = "SQL")]
    pub extra: Option<String>,
}

impl SelectArgs {
    pub fn to_options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new().filter(self.filter.to_filter()?);
        if let Some(column) = &self.order_by {
            let order = if self.desc {
                SortOrder::Desc
            } else {
                SortOrder::Asc
            };
            options = options.order_by(column.clone(), order);
        }
        options.skip = self.skip;
        options.limit = self.limit;
        options.extra = self.extra.clone();
        Ok(options)
    }
}

#[derive(Args, Debug, Clone)]
pub struct CountArgs {
    pub table: String,

    /// Columns to count; `*` when omitted
    #[arg(default_value = "")]
    pub columns: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Raw SQL appended after the WHERE clause
    #[arg(long, value_name = "SQL")]
    pub extra: Option<String>,
}

impl CountArgs {
    pub fn to_options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new().filter(self.filter.to_filter()?);
        options.extra = self.extra.clone();
        Ok(options)
    }
}

#[derive(Args, Debug, Clone)]
pub struct DeleteArgs {
    pub table: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Allow deleting every row when no --where is given
    #[arg(long)]
    pub all: bool,
}

impl DeleteArgs {
    pub fn to_filter(&self) -> Result<Filter> {
        if self.filter.conditions.is_empty() && !self.all {
            bail!("Refusing to delete every row of '{}' without --all", self.table);
        }
        self.filter.to_filter()
    }
}

#[derive(Args, Debug, Clone)]
pub struct InsertArgs {
    pub table: String,

    /// A JSON object, or an array of objects for several rows
    pub data: String,

    /// Columns to return (default `id`)
    #[arg(long, value_name = "COLUMNS")]
    pub returning: Option<String>,
}

impl InsertArgs {
    pub fn rows(&self) -> Result<Rows> {
        let value: JsonValue = serde_json::from_str(&self.data).context("Insert data is not JSON")?;
        Rows::from_json(value).ok_or_else(|| anyhow!("Insert data must be an object or an array of objects"))
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpdateArgs {
    pub table: String,

    /// A JSON object of new values; null leaves a column unchanged
    pub data: String,

    #[command(flatten)]
    pub filter: FilterArgs,

    /// Columns to return (default `id`)
    #[arg(long, value_name = "COLUMNS")]
    pub returning: Option<String>,
}

impl UpdateArgs {
    pub fn record(&self) -> Result<Record> {
        let value: JsonValue = serde_json::from_str(&self.data).context("Update data is not JSON")?;
        Record::from_json(value).ok_or_else(|| anyhow!("Update data must be a JSON object"))
    }

    pub fn to_options(&self) -> Result<QueryOptions> {
        let mut options = QueryOptions::new().filter(self.filter.to_filter()?);
        options.returning = self.returning.clone();
        Ok(options)
    }
}

/// Schema facts normally looked up in the catalog.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct FlagArgs {
    /// Assume the table has a `deleted_at` column
    #[arg(long)]
    pub soft_delete: bool,

    /// Assume the table has an `updated_at` column
    #[arg(long)]
    pub updated_at: bool,
}

impl FlagArgs {
    pub fn table_info(self, casts: &CastArgs) -> Result<TableInfo> {
        Ok(TableInfo {
            soft_delete: self.soft_delete,
            updated_at: self.updated_at,
            column_types: casts.to_types()?,
        })
    }
}

/// Declared column types normally read from the catalog.
#[derive(Args, Debug, Clone, Default)]
pub struct CastArgs {
    /// Cast values bound to COLUMN to TYPE, e.g. `id=uuid` (repeatable)
    #[arg(long = "cast", value_name = "COLUMN=TYPE")]
    pub casts: Vec<String>,
}

impl CastArgs {
    pub fn to_types(&self) -> Result<ColumnTypes> {
        let mut types = ColumnTypes::new();
        for cast in &self.casts {
            let (column, type_name) = cast
                .split_once('=')
                .ok_or_else(|| anyhow!("Invalid --cast '{}': expected COLUMN=TYPE", cast))?;
            if !types.insert(column.trim(), type_name.trim()) {
                bail!("Invalid --cast '{}': '{}' is not a type name", cast, type_name.trim());
            }
        }
        Ok(types)
    }
}

#[derive(Subcommand, Debug)]
pub enum PlanCommand {
    /// Print the SELECT statement
    Select {
        #[command(flatten)]
        args: SelectArgs,
        #[command(flatten)]
        flags: FlagArgs,
        #[command(flatten)]
        casts: CastArgs,
    },
    /// Print the COUNT statement
    Count {
        #[command(flatten)]
        args: CountArgs,
        #[command(flatten)]
        flags: FlagArgs,
        #[command(flatten)]
        casts: CastArgs,
    },
    /// Print the DELETE statement
    Delete {
        #[command(flatten)]
        args: DeleteArgs,
        #[command(flatten)]
        casts: CastArgs,
    },
    /// Print the UPDATE statement
    Update {
        #[command(flatten)]
        args: UpdateArgs,
        #[command(flatten)]
        flags: FlagArgs,
        #[command(flatten)]
        casts: CastArgs,
    },
    /// Print one INSERT statement per row
    Insert {
        #[command(flatten)]
        args: InsertArgs,
        #[command(flatten)]
        casts: CastArgs,
    },
}

fn plan_json(plan: &QueryPlan) -> JsonValue {
    json!({ "sql": plan.sql, "params": plan.params })
}

/// Assemble statements without a database and render them as JSON.
pub fn run_plan(command: PlanCommand) -> Result<JsonValue> {
    let output = match command {
        PlanCommand::Select { args, flags, casts } => {
            let spec = ColumnSpec::parse(&args.columns)?;
            let info = flags.table_info(&casts)?;
            plan_json(&plan::select(&args.table, &spec, &args.to_options()?, &info)?)
        }
        PlanCommand::Count { args, flags, casts } => {
            let spec = ColumnSpec::parse(&args.columns)?;
            let info = flags.table_info(&casts)?;
            plan_json(&plan::count(&args.table, &spec, &args.to_options()?, &info)?)
        }
        PlanCommand::Delete { args, casts } => plan_json(&plan::delete(
            &args.table,
            &args.to_filter()?,
            &casts.to_types()?,
        )?),
        PlanCommand::Update { args, flags, casts } => plan_json(&plan::update(
            &args.table,
            &args.record()?,
            &args.to_options()?,
            &flags.table_info(&casts)?,
        )?),
        PlanCommand::Insert { args, casts } => {
            let types = casts.to_types()?;
            let records = match args.rows()? {
                Rows::One(record) => vec![record],
                Rows::Many(records) => records,
            };
            let plans = records
                .iter()
                .map(|r| {
                    plan::insert(&args.table, r, args.returning.as_deref(), &types)
                        .map(|p| plan_json(&p))
                })
                .collect::<Result<Vec<_>, _>>()?;
            JsonValue::Array(plans)
        }
    };
    Ok(output)
}

pub async fn run_select(db: &Db, args: SelectArgs) -> Result<JsonValue> {
    let rows = db
        .select(&args.table, &args.columns, &args.to_options()?)
        .await
        .with_context(|| format!("select from '{}' failed", args.table))?;
    Ok(rows_json(rows))
}

pub async fn run_count(db: &Db, args: CountArgs) -> Result<JsonValue> {
    let count = db
        .count(&args.table, &args.columns, &args.to_options()?)
        .await
        .with_context(|| format!("count on '{}' failed", args.table))?;
    Ok(json!({ "count": count }))
}

pub async fn run_delete(db: &Db, args: DeleteArgs) -> Result<JsonValue> {
    let removed = db
        .remove(&args.table, args.to_filter()?)
        .await
        .with_context(|| format!("delete from '{}' failed", args.table))?;
    Ok(json!({ "removed": removed }))
}

pub async fn run_insert(db: &Db, args: InsertArgs) -> Result<JsonValue> {
    let rows = db
        .insert(&args.table, args.rows()?, args.returning.as_deref())
        .await
        .with_context(|| format!("insert into '{}' failed", args.table))?;
    Ok(rows_json(rows))
}

pub async fn run_update(db: &Db, args: UpdateArgs) -> Result<JsonValue> {
    let rows = db
        .update(&args.table, &args.record()?, &args.to_options()?)
        .await
        .with_context(|| format!("update of '{}' failed", args.table))?;
    Ok(rows_json(rows))
}

pub async fn run_has_column(db: &Db, table: &str, column: &str) -> Result<JsonValue> {
    let exists = db
        .exists_column(table, column)
        .await
        .with_context(|| format!("column lookup on '{}' failed", table))?;
    Ok(json!({ "table": table, "column": column, "exists": exists }))
}

fn rows_json(rows: Vec<rowkit_pg::Row>) -> JsonValue {
    JsonValue::Array(rows.into_iter().map(JsonValue::Object).collect())
}

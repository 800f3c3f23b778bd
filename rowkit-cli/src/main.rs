//! rowkit CLI - run column-spec queries against Postgres
//!
//! - `plan ...` prints the statement and parameters an operation would send,
//!   without a database
//! - `select`, `count`, `insert`, `update`, `delete`, `has-column` run the
//!   operation against the configured database and print JSON
//!
//! The connection comes from `--config FILE` (TOML) or from `DATABASE_URL`
//! and the `ROWKIT_*` variables (a `.env` file is honoured).

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rowkit_pg::{Db, DbConfig};
use tracing::debug;

mod commands;
mod tracing_setup;

use commands::{CountArgs, DeleteArgs, InsertArgs, PlanCommand, SelectArgs, UpdateArgs};
use tracing_setup::{init_tracing, TracingConfig};

#[derive(Parser, Debug)]
#[command(
    name = "rowkit",
    author,
    version,
    about = "Column-spec queries with inline joins for Postgres",
    long_about = "Turn compact column specs like `id,name,owner->org(org_id){org_name}` \
                  and filter expressions into parameterized SQL, and run them with \
                  soft-delete handling and timezone-normalized timestamps."
)]
struct Cli {
    /// Debug logging, including every statement and its parameters
    #[arg(long, global = true)]
    debug: bool,

    /// TOML config file (defaults to environment variables)
    #[arg(long, global = true, value_name = "PATH", env = "ROWKIT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the SQL an operation would run, without connecting
    #[command(subcommand)]
    Plan(PlanCommand),
    /// Select rows using a column spec
    Select(SelectArgs),
    /// Count rows
    Count(CountArgs),
    /// Insert one row (JSON object) or several (JSON array)
    Insert(InsertArgs),
    /// Update matching rows; null values leave columns unchanged
    Update(UpdateArgs),
    /// Delete matching rows
    Delete(DeleteArgs),
    /// Check whether a table has a column
    HasColumn {
        table: String,
        column: String,
    },
}

fn load_config(path: Option<&Path>, debug: bool) -> Result<DbConfig> {
    let mut config = match path {
        Some(path) => DbConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => DbConfig::from_env().context("Failed to read database settings from environment")?,
    };
    if debug {
        config.log_statements = true;
    }
    Ok(config)
}

async fn run(cli: Cli) -> Result<serde_json::Value> {
    let command = match cli.command {
        Commands::Plan(command) => return commands::run_plan(command),
        other => other,
    };

    let config = load_config(cli.config.as_deref(), cli.debug)?;
    debug!(max_attempts = config.max_attempts, timezone = %config.timezone, "connecting");
    let db = Db::connect(&config).await.context("Failed to create database pool")?;

    match command {
        Commands::Select(args) => commands::run_select(&db, args).await,
        Commands::Count(args) => commands::run_count(&db, args).await,
        Commands::Insert(args) => commands::run_insert(&db, args).await,
        Commands::Update(args) => commands::run_update(&db, args).await,
        Commands::Delete(args) => commands::run_delete(&db, args).await,
        Commands::HasColumn { table, column } => {
            commands::run_has_column(&db, &table, &column).await
        }
        Commands::Plan(command) => commands::run_plan(command),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&TracingConfig { debug: cli.debug }).ok();

    let output = run(cli).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

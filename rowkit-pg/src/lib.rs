//! rowkit-pg: Postgres execution for rowkit.
//!
//! [`Db`] exposes select/count/insert/update/remove/exists_column over a
//! sqlx pool. Statements come from `rowkit_core::plan`, run through the
//! [`Engine`] (retry on refused connections, row normalization) and consult
//! the [`SchemaIntrospector`] for soft-delete and update-stamp columns.
//!
//! ```ignore
//! let db = Db::connect(&DbConfig::from_env()?).await?;
//! let users = db
//!     .select("users", "id,name,owner->org(org_id){org_name}", &QueryOptions::new().limit(10))
//!     .await?;
//! ```

pub mod backend;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod pool;
pub mod schema;

pub use backend::{Backend, ColumnKind, ColumnMeta, ResultSet};
pub use config::DbConfig;
pub use db::{Db, Rows};
pub use engine::{Engine, EngineSettings, QueryResult, Row};
pub use error::{DbError, DbResult};
pub use pool::create_pool;
pub use schema::{SchemaIntrospector, TableSchema};

pub use rowkit_core as core;

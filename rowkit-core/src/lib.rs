//! rowkit-core: the SQL-building half of rowkit.
//!
//! Parses column specs (with inline joins), compiles structured filters and
//! assembles parameterized statements for select/count/insert/update/delete.
//! Nothing here talks to a database; see `rowkit-pg` for execution.

pub mod error;
pub mod filter;
pub mod options;
pub mod plan;
pub mod spec;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use filter::{Condition, Connective, Filter, FilterValue};
pub use options::{QueryOptions, SortOrder};
pub use plan::{QueryPlan, TableInfo, SOFT_DELETE_COLUMN, UPDATED_AT_COLUMN};
pub use spec::{ColumnSpec, JoinDescriptor};
pub use types::ColumnTypes;
pub use value::{Record, SqlValue};

/// Structured error types for rowkit-core.
///
/// Everything in this crate is synchronous and never touches a database, so
/// these errors always mean the caller's input was rejected before any
/// statement was issued.
use thiserror::Error;

/// Main error type for rowkit-core operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Column-spec string violates the join DSL grammar
    #[error("Malformed column spec '{spec}': {reason}")]
    MalformedSpec { spec: String, reason: String },

    /// Filter condition cannot be rendered (bad operator, empty column, ...)
    #[error("Malformed filter on column '{column}': {reason}")]
    MalformedFilter { column: String, reason: String },

    /// A parameter the operation cannot run without was omitted or empty
    #[error("Required parameter '{param}' is missing")]
    RequiredParameterMissing { param: String },
}

/// Result type alias for rowkit-core operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a malformed spec error
    pub fn malformed_spec(spec: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedSpec {
            spec: spec.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed filter error
    pub fn malformed_filter(column: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedFilter {
            column: column.into(),
            reason: reason.into(),
        }
    }

    /// Create a missing parameter error
    pub fn required(param: impl Into<String>) -> Self {
        Self::RequiredParameterMissing {
            param: param.into(),
        }
    }
}

//! Error types for pgmeta

use std::time::Duration;
use thiserror::Error;

/// Result type alias for pgmeta operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Contract violations detected while composing or assembling a statement.
///
/// These never reach the database: they are raised before any round trip and
/// are never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    /// UPDATE/DELETE assembled without any WHERE predicate
    #[error("statement has no WHERE predicate")]
    MissingWhere,

    /// UPDATE assembled with an empty SET list
    #[error("UPDATE has an empty SET list")]
    MissingSet,

    /// Field expression outside the supported member/NOT/AND/OR subset
    #[error("unsupported expression: {0}")]
    UnsupportedExpression(String),

    /// Explicit parameter name registered twice
    #[error("parameter name conflict: {0}")]
    Conflict(String),

    /// Fragment references a placeholder with no bound value
    #[error("dangling placeholder: {0}")]
    DanglingPlaceholder(String),

    /// Malformed `{n}` / `{name}` template
    #[error("invalid template: {0}")]
    InvalidTemplate(String),

    /// Operation needs a primary key the entity does not declare
    #[error("entity `{0}` declares no primary key")]
    NoPrimaryKey(&'static str),

    /// Raw or template predicate with no text
    #[error("empty predicate")]
    EmptyPredicate,
}

/// Error types for database operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// Statement could not be assembled
    #[error("Usage error: {0}")]
    Usage(#[from] UsageError),

    /// Scalar read returned no row and no default was supplied
    #[error("No rows returned")]
    NoRows,

    /// Database connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query execution error
    #[error("Query error: {0}")]
    Query(#[from] tokio_postgres::Error),

    /// Unique constraint violation
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    /// Foreign key constraint violation
    #[error("Foreign key violation: {0}")]
    ForeignKeyViolation(String),

    /// Check constraint violation
    #[error("Check constraint violation: {0}")]
    CheckViolation(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Executor failure annotated with the statement that caused it
    #[error("{source} (sql: {sql})")]
    Statement {
        sql: String,
        #[source]
        source: Box<OrmError>,
    },

    /// A pipeline entry failed; the whole batch was rolled back
    #[error("pipeline entry {index} failed: {source}")]
    Pipeline {
        index: usize,
        #[source]
        source: Box<OrmError>,
    },

    /// Rolling back after a failure failed as well
    #[error("{original} (rollback failed: {rollback})")]
    Rollback {
        original: Box<OrmError>,
        rollback: Box<OrmError>,
    },

    /// The in-flight round trip was cancelled by the caller
    #[error("Operation cancelled")]
    Cancelled,

    /// Query timeout error
    #[error("Query timeout after {0:?}")]
    Timeout(Duration),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl OrmError {
    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Attach the command text to an executor error.
    pub fn in_statement(self, sql: impl Into<String>) -> Self {
        Self::Statement {
            sql: sql.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, looking through statement/pipeline context.
    pub fn root(&self) -> &OrmError {
        match self {
            Self::Statement { source, .. } | Self::Pipeline { source, .. } => source.root(),
            Self::Rollback { original, .. } => original.root(),
            other => other,
        }
    }

    /// The usage error behind this error, if any.
    pub fn usage(&self) -> Option<&UsageError> {
        match self.root() {
            Self::Usage(e) => Some(e),
            _ => None,
        }
    }

    /// Check if this is a unique violation error
    pub fn is_unique_violation(&self) -> bool {
        matches!(self.root(), Self::UniqueViolation(_))
    }

    /// Check if this is a missing-row error
    pub fn is_no_rows(&self) -> bool {
        matches!(self.root(), Self::NoRows)
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self.root(), Self::Timeout(_))
    }

    /// Check if this is a cancellation error
    pub fn is_cancelled(&self) -> bool {
        matches!(self.root(), Self::Cancelled)
    }

    /// Index of the failing pipeline entry, if this is a pipeline error.
    pub fn pipeline_index(&self) -> Option<usize> {
        match self {
            Self::Pipeline { index, .. } => Some(*index),
            Self::Rollback { original, .. } => original.pipeline_index(),
            _ => None,
        }
    }

    /// Parse a tokio_postgres error into a more specific OrmError
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            let constraint = db_err.constraint().unwrap_or("unknown");
            let message = db_err.message();

            match db_err.code().code() {
                "23505" => return Self::UniqueViolation(format!("{}: {}", constraint, message)),
                "23503" => {
                    return Self::ForeignKeyViolation(format!("{}: {}", constraint, message));
                }
                "23514" => return Self::CheckViolation(format!("{}: {}", constraint, message)),
                "57014" => return Self::Cancelled,
                _ => {}
            }
        }
        Self::Query(err)
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_looks_through_context() {
        let err = OrmError::Pipeline {
            index: 1,
            source: Box::new(OrmError::NoRows.in_statement("SELECT 1")),
        };
        assert!(err.is_no_rows());
        assert_eq!(err.pipeline_index(), Some(1));
        assert!(err.to_string().contains("pipeline entry 1"));
    }

    #[test]
    fn usage_errors_convert() {
        let err: OrmError = UsageError::MissingWhere.into();
        assert_eq!(err.usage(), Some(&UsageError::MissingWhere));
        assert!(!err.is_timeout());
    }

    #[test]
    fn rollback_keeps_original_index() {
        let err = OrmError::Rollback {
            original: Box::new(OrmError::Pipeline {
                index: 2,
                source: Box::new(OrmError::Other("boom".into())),
            }),
            rollback: Box::new(OrmError::Other("gone".into())),
        };
        assert_eq!(err.pipeline_index(), Some(2));
        assert!(err.to_string().contains("rollback failed: gone"));
    }
}

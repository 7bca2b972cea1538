use thiserror::Error;

/// Error taxonomy for the query engine.
///
/// Validation failures (`InvalidTable`, `InvalidColumn`, `InvalidSortOrder`,
/// `InvalidFilter`, `UnsafeQuery`) are deterministic: retrying the same
/// request cannot succeed, so callers must report them and stop.
/// `QueryExecutionFailed` may be retried by the caller with backoff; this
/// crate never retries internally.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Schema introspection failed. Callers must not fall back to stale
    /// assumptions about which tables or columns exist.
    #[error("schema introspection failed: {0}")]
    SchemaUnavailable(String),

    #[error("unknown or invalid table: {0}")]
    InvalidTable(String),

    #[error("unknown or invalid column: {0}")]
    InvalidColumn(String),

    #[error("invalid sort order: {0} (expected \"asc\" or \"desc\")")]
    InvalidSortOrder(String),

    /// A string failed identifier validation before it could be quoted.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// A filter is structurally wrong for its operator (missing value,
    /// missing `value2` on `between`, non-array value on `in`, ...).
    #[error("invalid filter on column {column}: {reason}")]
    InvalidFilter { column: String, reason: String },

    /// The read-only guard rejected a statement. Never partially executed.
    #[error("statement rejected by read-only guard")]
    UnsafeQuery,

    /// Database error or timeout during execution. The transaction has been
    /// rolled back before this is raised.
    #[error("query execution failed: {message}")]
    QueryExecutionFailed { message: String, timeout: bool },

    /// The language-model collaborator failed or returned unparsable output.
    /// Fails closed: no fallback SQL is ever guessed.
    #[error("natural-language translation unavailable: {0}")]
    TranslationUnavailable(String),
}

impl QueryError {
    /// Wrap a database error, flagging statement timeouts (SQLSTATE 57014)
    /// so callers can decide to retry with a smaller page.
    pub fn from_pg(err: tokio_postgres::Error) -> Self {
        let timeout = err
            .as_db_error()
            .map(|db| db.code().code() == "57014")
            .unwrap_or(false);
        QueryError::QueryExecutionFailed {
            message: err.to_string(),
            timeout,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, QueryError::QueryExecutionFailed { timeout: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, QueryError>;

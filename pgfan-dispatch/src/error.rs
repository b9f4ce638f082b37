//! Error types for dispatch operations.
//!
//! Errors fall into two groups:
//! - fatal errors ([`DispatchError`]) abort a whole dispatch call before any
//!   task runs (bad configuration, a template that fails validation, or a
//!   pool that could not be built);
//! - per-task query failures, which never surface as a `DispatchError` from
//!   [`ParallelDispatcher::execute`](crate::dispatcher::ParallelDispatcher::execute)
//!   but are recorded in the failing task's [`TaskResult`](crate::types::TaskResult).

use thiserror::Error;

/// Result type for dispatch operations.
pub type DispatchResult<T> = Result<T, DispatchError>;

/// Errors that can occur while dispatching a search.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// Missing or invalid configuration, parameter sets, or concurrency.
    #[error("configuration error: {0}")]
    Config(String),

    /// The SQL template failed structural validation.
    #[error("SQL template validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Opening a connection or applying its session statement failed.
    #[error("connection error: {0}")]
    Connection(String),

    /// A single query failed.
    #[error("query error: {0}")]
    Query(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DispatchError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Create a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a configuration error.
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Check if this is a validation error.
    pub fn is_validation_error(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connection(_))
    }

    /// Check if this error aborts a whole dispatch call.
    ///
    /// Query errors are the only kind that stay local to one task.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Query(_))
    }

    /// The bare message, without the category prefix added by `Display`.
    ///
    /// Task results carry this form, so a failed task reports what the
    /// database said rather than `query error: ...`.
    pub fn message(&self) -> String {
        match self {
            Self::Config(msg)
            | Self::Connection(msg)
            | Self::Query(msg)
            | Self::Internal(msg) => msg.clone(),
            Self::Validation(e) => e.to_string(),
        }
    }
}

/// Structural problems found in a SQL template.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Blank input.
    #[error("invalid sql template: must be a non-empty string")]
    Empty,

    /// The first statement is not a `SELECT`.
    #[error("invalid sql template: must be a SELECT statement")]
    NotSelect,

    /// Zero or several statements after removing comments.
    #[error("must contain exactly one query, found {0}")]
    StatementCount(usize),

    /// None of the distance operator tokens is present.
    #[error("invalid sql template: must contain vector operator <->, <=>, <+>, <~>, <%> or <#>")]
    MissingVectorOperator,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = DispatchError::config("invalid paramsList");
        assert!(err.is_config_error());
        assert!(err.is_fatal());

        let err = DispatchError::connection("connection refused");
        assert!(err.is_connection_error());

        let err = DispatchError::query("relation \"items\" does not exist");
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_validation_error_is_prefixed() {
        let err: DispatchError = ValidationError::NotSelect.into();
        assert!(err.is_validation_error());
        assert_eq!(
            err.to_string(),
            "SQL template validation failed: invalid sql template: must be a SELECT statement"
        );
    }

    #[test]
    fn test_statement_count_message() {
        let err = ValidationError::StatementCount(2);
        assert_eq!(err.to_string(), "must contain exactly one query, found 2");
    }

    #[test]
    fn test_message_drops_prefix() {
        let err = DispatchError::query("division by zero");
        assert_eq!(err.to_string(), "query error: division by zero");
        assert_eq!(err.message(), "division by zero");
    }
}

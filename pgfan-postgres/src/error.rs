//! Error types for PostgreSQL operations.

use pgfan_dispatch::DispatchError;
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Connection error.
    #[error("connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Row deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Type conversion error.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PgError {
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

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Connection(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }

    /// The most specific message available.
    ///
    /// For errors reported by the server this is the server's own message,
    /// without driver prefixes.
    pub fn message(&self) -> String {
        match self {
            Self::Postgres(e) => describe(e),
            Self::Config(msg)
            | Self::Connection(msg)
            | Self::Query(msg)
            | Self::Deserialization(msg)
            | Self::TypeConversion(msg)
            | Self::Internal(msg) => msg.clone(),
        }
    }
}

/// Describe a driver error, preferring the server's message.
pub fn describe(err: &tokio_postgres::Error) -> String {
    match err.as_db_error() {
        Some(db) => db.message().to_string(),
        None => err.to_string(),
    }
}

impl From<PgError> for DispatchError {
    fn from(err: PgError) -> Self {
        let message = err.message();
        match err {
            PgError::Config(_) => DispatchError::Config(message),
            PgError::Connection(_) => DispatchError::Connection(message),
            PgError::Internal(_) => DispatchError::Internal(message),
            PgError::Postgres(_)
            | PgError::Query(_)
            | PgError::Deserialization(_)
            | PgError::TypeConversion(_) => DispatchError::Query(message),
        }
    }
}

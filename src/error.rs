//! Error types for the data-access layer.
//!
//! This module defines all error types using `thiserror`. Update conflicts are
//! deliberately absent: an optimistic update that loses its race is a normal
//! outcome (`UpdateOutcome::Lost`), not an error.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DalError {
    /// Invalid or missing schema metadata, unknown routing key, empty
    /// topology. Fatal; never retried.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// An identifier-scoped statement touched more than one row, or a
    /// required identifier was null at write time.
    #[error("Integrity violation: {message}")]
    Integrity { message: String },

    /// Failure raised by the underlying connection provider, re-raised with
    /// the statement shape and the routing key that was in effect.
    #[error("Provider error on [{routing_key}]: {message} (statement: {statement})")]
    Provider {
        message: String,
        statement: String,
        routing_key: String,
    },

    /// Connection acquisition or pool construction failed.
    #[error("Connection error: {message}")]
    Connection { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    /// A raw row could not be converted into a typed record.
    #[error("Hydration error for column '{column}': {message}")]
    Hydration { message: String, column: String },
}

impl DalError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an integrity violation.
    pub fn integrity(message: impl Into<String>) -> Self {
        Self::Integrity {
            message: message.into(),
        }
    }

    /// Wrap a provider failure with statement shape and routing key.
    pub fn provider(
        message: impl Into<String>,
        statement: impl Into<String>,
        routing_key: impl Into<String>,
    ) -> Self {
        Self::Provider {
            message: message.into(),
            statement: statement.into(),
            routing_key: routing_key.into(),
        }
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create a hydration error.
    pub fn hydration(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Hydration {
            message: message.into(),
            column: column.into(),
        }
    }

    /// True for errors the caller may reasonably retry on a fresh unit of
    /// work. Configuration and integrity failures are never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Provider { .. })
    }
}

/// Convert sqlx errors raised by the bundled provider to DalError.
impl From<sqlx::Error> for DalError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DalError::configuration(msg.to_string()),
            sqlx::Error::Database(db_err) => {
                let message = match db_err.code() {
                    Some(code) => format!("{} (SQLSTATE: {})", db_err.message(), code),
                    None => db_err.message().to_string(),
                };
                // Statement and routing key are attached by the handle layer.
                DalError::provider(message, "", "")
            }
            sqlx::Error::PoolTimedOut => {
                DalError::connection("Timed out acquiring a connection from the pool")
            }
            sqlx::Error::PoolClosed => DalError::connection("Connection pool is closed"),
            sqlx::Error::Io(io_err) => DalError::connection(format!("I/O error: {}", io_err)),
            sqlx::Error::Tls(tls_err) => DalError::connection(format!("TLS error: {}", tls_err)),
            sqlx::Error::Protocol(msg) => {
                DalError::connection(format!("Protocol error: {}", msg))
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DalError::hydration(format!("Failed to decode column: {}", source), index)
            }
            sqlx::Error::Decode(source) => {
                DalError::hydration(format!("Decode error: {}", source), "")
            }
            other => DalError::provider(other.to_string(), "", ""),
        }
    }
}

/// Result type alias for data-access operations.
pub type DalResult<T> = Result<T, DalError>;

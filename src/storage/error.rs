//! Error types for storage operations

use std::fmt;

use super::query::QueryBuilderError;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations
#[derive(Debug)]
pub enum StorageError {
    /// Database connection failed
    ConnectionFailed(String),

    /// Database query failed
    QueryFailed(String),

    /// No record with the given id
    NotFound(i32),

    /// The repository does not implement this operation
    Unsupported(&'static str),

    /// A stored row could not be turned back into a record
    InvalidRecord(String),

    /// A statement could not be built
    Query(QueryBuilderError),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::ConnectionFailed(msg) => {
                write!(f, "failed to connect to the database: {}", msg)
            }
            StorageError::QueryFailed(msg) => write!(f, "storage query failed: {}", msg),
            StorageError::NotFound(id) => write!(f, "no record with id {}", id),
            StorageError::Unsupported(operation) => {
                write!(f, "{} is not supported by this repository", operation)
            }
            StorageError::InvalidRecord(msg) => write!(f, "invalid stored record: {}", msg),
            StorageError::Query(err) => write!(f, "failed to build statement: {}", err),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Query(err) => Some(err),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::QueryFailed("no rows found".to_string()),
            sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::Tls(_) => {
                StorageError::ConnectionFailed(err.to_string())
            }
            _ => StorageError::QueryFailed(err.to_string()),
        }
    }
}

impl From<QueryBuilderError> for StorageError {
    fn from(err: QueryBuilderError) -> Self {
        StorageError::Query(err)
    }
}

//! Query error types
//!
//! Defines all error conditions that can occur while reading history.

use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// The device does not exist
    #[error("Device not found: {0}")]
    NotFound(String),

    /// Invalid time range specified
    #[error("Invalid time range: {0}")]
    InvalidTimeRange(String),

    /// A query parameter is malformed
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;

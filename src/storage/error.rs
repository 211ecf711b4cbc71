//! Storage error types
//!
//! Defines all errors that can occur in the storage layer.

use thiserror::Error;

/// Errors that can occur in the telemetry store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SQLite reported an error
    #[error("Database error: {0}")]
    Database(rusqlite::Error),

    /// A UNIQUE / PRIMARY KEY constraint rejected the write.
    /// Carries the offending column, e.g. `devices.api_key`.
    #[error("Unique constraint violated: {0}")]
    Conflict(String),

    /// The referenced device does not exist
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// The credential presented with a write no longer matches the device
    #[error("Credential rejected for device {0}")]
    CredentialRejected(String),

    /// A stored value could not be decoded
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// No pooled connection became available in time
    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// The blocking database task panicked or was cancelled
    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// True if this is a uniqueness conflict on the given column
    pub fn is_conflict_on(&self, column: &str) -> bool {
        match self {
            StorageError::Conflict(col) => col.ends_with(column),
            _ => false,
        }
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(ref failure, Some(ref message)) = err {
            if failure.code == rusqlite::ErrorCode::ConstraintViolation {
                // "UNIQUE constraint failed: devices.api_key"
                if let Some(column) = message.strip_prefix("UNIQUE constraint failed: ") {
                    return StorageError::Conflict(column.trim().to_string());
                }
            }
        }
        StorageError::Database(err)
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::DeviceNotFound("ESP32-001".to_string());
        assert_eq!(err.to_string(), "Device not found: ESP32-001");

        let err = StorageError::Conflict("devices.api_key".to_string());
        assert_eq!(
            err.to_string(),
            "Unique constraint violated: devices.api_key"
        );
    }

    #[test]
    fn test_conflict_column_match() {
        let err = StorageError::Conflict("devices.device_id".to_string());
        assert!(err.is_conflict_on("device_id"));
        assert!(!err.is_conflict_on("api_key"));
        assert!(!StorageError::Corruption("bad row".into()).is_conflict_on("device_id"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}

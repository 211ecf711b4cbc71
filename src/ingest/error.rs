//! Ingestion error types

use crate::registry::RegistryError;
use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur while accepting a reading
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Invalid device credentials")]
    Authentication,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        match err {
            // Key rotated, device retired or deleted after authentication
            StorageError::CredentialRejected(_) | StorageError::DeviceNotFound(_) => {
                IngestError::Authentication
            }
            other => IngestError::Storage(other),
        }
    }
}

impl From<RegistryError> for IngestError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Authentication | RegistryError::NotFound(_) => {
                IngestError::Authentication
            }
            RegistryError::Validation(msg) | RegistryError::Conflict(msg) => {
                IngestError::Validation(msg)
            }
            RegistryError::Storage(e) => IngestError::from(e),
        }
    }
}

pub type IngestResult<T> = Result<T, IngestError>;

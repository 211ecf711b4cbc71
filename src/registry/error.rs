//! Registry error types

use crate::storage::StorageError;
use thiserror::Error;

/// Errors raised by the device registry
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Unknown device, wrong key and retired device all look the same
    #[error("Invalid device credentials")]
    Authentication,

    #[error("Device not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

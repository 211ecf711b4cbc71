//! Device Registry
//!
//! - **service**: `DeviceRegistry` (register, create, authenticate, rotate_key, ...)
//! - **credentials**: API key generation and constant-time comparison
//! - **error**: Error types

pub mod credentials;
pub mod error;
pub mod service;

pub use credentials::{generate_api_key, keys_match};
pub use error::{RegistryError, RegistryResult};
pub use service::{
    DeviceRegistration, DeviceRegistry, RegisteredDevice, DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE,
};

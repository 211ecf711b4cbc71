//! Agrotel Telemetry Store
//!
//! This module provides persistence for devices and their reading history:
//!
//! - **types**: Core data structures (Device, SensorReading, SensorFields)
//! - **schema**: SQLite schema and `user_version` migrations
//! - **engine**: `TelemetryStore`, the async facade over the SQLite connection
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   append_reading → spawn_blocking → BEGIN IMMEDIATE
//!     → credential re-check + last_seen → INSERT reading → COMMIT
//!
//! Read Path:
//!   readings / latest → (device_id, timestamp DESC) index → rows
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use agrotel::storage::{StorageConfig, TelemetryStore, ReadingQuery};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TelemetryStore::open(StorageConfig::new("./data")).await?;
//!
//!     let history = store.readings("ESP32-001", ReadingQuery::new().limit(10)).await?;
//!     println!("{} readings", history.len());
//!
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use engine::{StorageConfig, StorageStats, TelemetryStore};
pub use error::{StorageError, StorageResult};
pub use types::{
    Device, DeviceChanges, DeviceFilter, DeviceStatus, DeviceType, FieldSummary, NewDevice, Page,
    ReadingQuery, ReadingSummary, SensorField, SensorFields, SensorReading, SortOrder,
};

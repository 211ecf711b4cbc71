//! # Agrotel
//!
//! Field sensor telemetry for agricultural operations: device registry,
//! authenticated reading ingestion, live broadcast to dashboards and
//! time-series queries.
//!
//! ## Features
//!
//! - **Device registry**: Idempotent self-registration, rotatable API keys
//! - **Ingestion**: Authenticated, validated, never clamped
//! - **Real-time**: WebSocket fan-out per device and to the dashboard
//! - **Queries**: History, latest, hourly / daily aggregates, statistics
//!
//! ## Modules
//!
//! - [`storage`]: SQLite-backed device and reading store
//! - [`registry`]: Device registration and authentication
//! - [`ingest`]: Reading submission pipeline
//! - [`broadcast`]: In-process publish/subscribe hub
//! - [`query`]: Read-side time-series queries
//! - [`websocket`]: WebSocket transport over the hub
//! - [`api`]: REST API server with Axum
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agrotel::broadcast::BroadcastHub;
//! use agrotel::ingest::{IngestionService, RawChannels};
//! use agrotel::registry::{DeviceRegistration, DeviceRegistry};
//! use agrotel::storage::{StorageConfig, TelemetryStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = TelemetryStore::open(StorageConfig::default()).await?;
//!     let registry = DeviceRegistry::new(store.clone());
//!     let ingest = IngestionService::new(
//!         registry.clone(),
//!         store.clone(),
//!         Arc::new(BroadcastHub::default()),
//!     );
//!
//!     // Register a device and keep its key
//!     let registered = registry
//!         .register(DeviceRegistration::new("ESP32-001", "Garden bed 1"))
//!         .await?;
//!     let api_key = registered.api_key.unwrap_or_default();
//!
//!     // Report a reading
//!     let channels = RawChannels {
//!         temperature: Some(24.5),
//!         soil_moisture: Some(41.0),
//!         ..Default::default()
//!     };
//!     let reading = ingest.submit("ESP32-001", &api_key, channels).await?;
//!
//!     println!("Stored reading {}", reading.id);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod broadcast;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod query;
pub mod registry;
pub mod storage;
pub mod websocket;

// Re-export top-level types for convenience
pub use storage::{
    Device, DeviceStatus, DeviceType, SensorFields, SensorReading, StorageConfig, StorageError,
    StorageResult, TelemetryStore,
};

pub use registry::{DeviceRegistration, DeviceRegistry, RegistryError};

pub use ingest::{IngestError, IngestionService, RawChannels};

pub use broadcast::{BroadcastHub, Broadcaster, HubConfig, HubError, OutboundQueue};

pub use query::{Bucket, QueryError, QueryService};

pub use api::{build_router, serve, ApiConfig, ApiError, AppState};

pub use config::{Config, ConfigError, LoggingConfig};

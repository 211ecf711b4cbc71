//! Agrotel Query Service
//!
//! Read-only time-series access over the telemetry store:
//!
//! - **service**: History, latest, aggregates, stats and overview
//! - **aggregate**: Hour / day bucketing with per-channel averages
//! - **error**: Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use agrotel::query::{Bucket, HistoryQuery, QueryService};
//!
//! let service = QueryService::new(store);
//!
//! // Ten most recent readings
//! let recent = service
//!     .history("ESP32-001", HistoryQuery { limit: Some(10), ..Default::default() })
//!     .await?;
//!
//! // Hourly averages over the last day
//! let hourly = service.aggregate("ESP32-001", Bucket::Hour, None, None).await?;
//! ```

mod aggregate;
mod error;
mod service;

pub use aggregate::{aggregate, AggregateBucket, Bucket};
pub use error::{QueryError, QueryResult};
pub use service::{
    DeviceStats, HistoryQuery, Overview, QueryService, DEFAULT_HISTORY_LIMIT, MAX_HISTORY_LIMIT,
};

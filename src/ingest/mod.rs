//! Reading ingestion
//!
//! - **service**: `IngestionService::submit`
//! - **validate**: Channel presence and domain checks
//! - **error**: Error types

pub mod error;
pub mod service;
pub mod validate;

pub use error::{IngestError, IngestResult};
pub use service::IngestionService;
pub use validate::{validate, RawChannels};

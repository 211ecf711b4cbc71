//! Data Transfer Objects
//!
//! Request and response types for the API endpoints.
//! These types are serialized/deserialized to/from JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::broadcast::HubStats;
use crate::ingest::RawChannels;
use crate::query::{AggregateBucket, Bucket};
use crate::storage::{Device, DeviceStatus, DeviceType, SensorReading, SortOrder};

// ============================================
// DEVICE DTOs
// ============================================

/// Self-registration / admin create request
#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub device_id: String,
    pub device_name: String,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub location: Option<String>,
    /// Initial status; only honoured by the admin create route
    #[serde(default)]
    pub status: Option<DeviceStatus>,
}

/// Registration response
#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub success: bool,
    pub device_id: String,
    /// Only present when the device was created by this request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub created: bool,
    pub device: Device,
}

/// Device listing query string
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DeviceListParams {
    pub search: Option<String>,
    pub status: Option<DeviceStatus>,
    pub device_type: Option<DeviceType>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// A device plus its most recent reading
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceSummary {
    #[serde(flatten)]
    pub device: Device,
    pub latest_reading: Option<SensorReading>,
}

/// Device listing response
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<DeviceSummary>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// Key rotation response
#[derive(Debug, Serialize, Deserialize)]
pub struct RotateKeyResponse {
    pub success: bool,
    pub device_id: String,
    pub api_key: String,
}

/// Generic acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
    pub message: String,
}

// ============================================
// INGEST DTOs
// ============================================

/// Reading submitted by a device
#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub device_id: String,
    pub api_key: String,
    /// Sensor channels; unknown fields are ignored
    #[serde(flatten)]
    pub channels: RawChannels,
}

/// Submission acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub success: bool,
    pub reading_id: i64,
    pub timestamp: DateTime<Utc>,
}

// ============================================
// READING DTOs
// ============================================

/// History query string
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReadingsParams {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: Option<SortOrder>,
}

/// History response
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadingsResponse {
    pub device_id: String,
    pub device_name: String,
    pub count: usize,
    pub readings: Vec<SensorReading>,
}

/// Latest reading response
#[derive(Debug, Serialize, Deserialize)]
pub struct LatestResponse {
    pub device_id: String,
    pub reading: Option<SensorReading>,
}

/// Aggregate query string
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AggregateParams {
    pub bucket: Option<Bucket>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

/// Aggregate response
#[derive(Debug, Serialize)]
pub struct AggregateResponse {
    pub device_id: String,
    pub bucket: Bucket,
    pub buckets: Vec<AggregateBucket>,
}

/// Stats query string
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StatsParams {
    /// Restrict to the trailing window of this many hours
    pub hours: Option<u32>,
}

/// Export query string
#[derive(Debug, Deserialize)]
pub struct ExportParams {
    /// csv, json or ndjson
    #[serde(default = "default_export_format")]
    pub format: String,
    #[serde(default)]
    pub since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub until: Option<DateTime<Utc>>,
}

fn default_export_format() -> String {
    "csv".to_string()
}

// ============================================
// HEALTH DTOs
// ============================================

/// Full health status response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// healthy, degraded or unhealthy
    pub status: String,
    /// ok or error
    pub storage: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub devices: u64,
    pub readings: u64,
    pub database_size_bytes: u64,
    pub hub: HubStats,
}

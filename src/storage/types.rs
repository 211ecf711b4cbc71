//! Core data types for the Agrotel telemetry store
//!
//! This module defines the fundamental types used throughout the crate:
//! - `Device`: A registered field sensor unit
//! - `SensorReading`: One timestamped sample of one or more channels
//! - `SensorFields` / `SensorField`: The optional sensor channels
//! - `DeviceType` and `DeviceStatus`: Classification enums
//! - `ReadingQuery`, `DeviceFilter`, `Page`: Read-side parameters and results

use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Kind of sensor hardware a device carries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    /// Soil moisture probe
    Soil,
    /// Temperature probe
    Temperature,
    /// Humidity probe
    Humidity,
    /// Combined multi-sensor board
    #[default]
    #[serde(alias = "multi-sensor", alias = "multi_sensor")]
    Multi,
}

impl DeviceType {
    /// Get all device types for iteration
    pub fn all() -> &'static [DeviceType] {
        &[
            DeviceType::Soil,
            DeviceType::Temperature,
            DeviceType::Humidity,
            DeviceType::Multi,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Soil => "soil",
            DeviceType::Temperature => "temperature",
            DeviceType::Humidity => "humidity",
            DeviceType::Multi => "multi",
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "soil" => Ok(DeviceType::Soil),
            "temperature" => Ok(DeviceType::Temperature),
            "humidity" => Ok(DeviceType::Humidity),
            "multi" | "multi-sensor" | "multi_sensor" => Ok(DeviceType::Multi),
            other => Err(format!("unknown device type '{}'", other)),
        }
    }
}

/// Operational status of a device
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    /// Reporting normally
    #[default]
    Active,
    /// Retired; readings are refused
    Inactive,
    /// Temporarily serviced; readings still accepted
    Maintenance,
}

impl DeviceStatus {
    pub fn all() -> &'static [DeviceStatus] {
        &[
            DeviceStatus::Active,
            DeviceStatus::Inactive,
            DeviceStatus::Maintenance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Active => "active",
            DeviceStatus::Inactive => "inactive",
            DeviceStatus::Maintenance => "maintenance",
        }
    }

    /// Whether a device in this status may submit readings
    pub fn accepts_readings(&self) -> bool {
        !matches!(self, DeviceStatus::Inactive)
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "active" => Ok(DeviceStatus::Active),
            "inactive" => Ok(DeviceStatus::Inactive),
            "maintenance" => Ok(DeviceStatus::Maintenance),
            other => Err(format!("unknown device status '{}'", other)),
        }
    }
}

macro_rules! text_column {
    ($ty:ty) => {
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                value
                    .as_str()?
                    .parse()
                    .map_err(|e: String| FromSqlError::Other(e.into()))
            }
        }
    };
}

text_column!(DeviceType);
text_column!(DeviceStatus);

/// A registered field sensor unit
///
/// The API key is deliberately not part of this struct; it only leaves the
/// registry at creation and rotation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Device {
    /// External, registrant-assigned identifier
    pub device_id: String,
    /// Human-readable name
    pub device_name: String,
    pub device_type: DeviceType,
    /// Free-form location label (e.g. "Garden A")
    #[serde(default)]
    pub location: Option<String>,
    pub status: DeviceStatus,
    /// When the device was first registered
    pub registered_at: DateTime<Utc>,
    /// Server timestamp of the most recent accepted reading
    #[serde(default)]
    pub last_seen: Option<DateTime<Utc>>,
}

/// Row to insert when creating a device
#[derive(Debug, Clone)]
pub struct NewDevice {
    pub device_id: String,
    pub device_name: String,
    pub device_type: DeviceType,
    pub location: Option<String>,
    pub status: DeviceStatus,
    pub api_key: String,
    pub registered_at: DateTime<Utc>,
}

/// Partial metadata update; `None` leaves a column untouched
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct DeviceChanges {
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub status: Option<DeviceStatus>,
}

impl DeviceChanges {
    pub fn is_empty(&self) -> bool {
        self.device_name.is_none()
            && self.device_type.is_none()
            && self.location.is_none()
            && self.status.is_none()
    }
}

/// One sensor channel a reading may carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorField {
    Temperature,
    Humidity,
    SoilMoisture,
    SoilRaw,
    BatteryLevel,
    SignalStrength,
}

impl SensorField {
    pub const ALL: [SensorField; 6] = [
        SensorField::Temperature,
        SensorField::Humidity,
        SensorField::SoilMoisture,
        SensorField::SoilRaw,
        SensorField::BatteryLevel,
        SensorField::SignalStrength,
    ];

    /// Column / JSON key name
    pub fn name(&self) -> &'static str {
        match self {
            SensorField::Temperature => "temperature",
            SensorField::Humidity => "humidity",
            SensorField::SoilMoisture => "soil_moisture",
            SensorField::SoilRaw => "soil_raw",
            SensorField::BatteryLevel => "battery_level",
            SensorField::SignalStrength => "signal_strength",
        }
    }

    /// Channels stored as integers
    pub fn is_integer(&self) -> bool {
        matches!(self, SensorField::SoilRaw | SensorField::SignalStrength)
    }
}

impl std::fmt::Display for SensorField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// The sensor channels of one reading. Every channel is optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SensorFields {
    /// Temperature in Celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Relative humidity percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,
    /// Soil moisture percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_moisture: Option<f64>,
    /// Raw analog soil sensor value (0-4095)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub soil_raw: Option<i64>,
    /// Battery level percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f64>,
    /// Signal strength (RSSI dBm or CSQ)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal_strength: Option<i64>,
}

impl SensorFields {
    /// Value of a channel widened to f64
    pub fn get(&self, field: SensorField) -> Option<f64> {
        match field {
            SensorField::Temperature => self.temperature,
            SensorField::Humidity => self.humidity,
            SensorField::SoilMoisture => self.soil_moisture,
            SensorField::SoilRaw => self.soil_raw.map(|v| v as f64),
            SensorField::BatteryLevel => self.battery_level,
            SensorField::SignalStrength => self.signal_strength.map(|v| v as f64),
        }
    }

    /// Iterate over the populated channels
    pub fn populated(&self) -> impl Iterator<Item = (SensorField, f64)> + '_ {
        SensorField::ALL
            .iter()
            .filter_map(move |&field| self.get(field).map(|v| (field, v)))
    }

    pub fn populated_count(&self) -> usize {
        self.populated().count()
    }

    pub fn is_empty(&self) -> bool {
        self.populated_count() == 0
    }

    pub fn temperature(mut self, value: f64) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn humidity(mut self, value: f64) -> Self {
        self.humidity = Some(value);
        self
    }

    pub fn soil_moisture(mut self, value: f64) -> Self {
        self.soil_moisture = Some(value);
        self
    }

    pub fn soil_raw(mut self, value: i64) -> Self {
        self.soil_raw = Some(value);
        self
    }

    pub fn battery_level(mut self, value: f64) -> Self {
        self.battery_level = Some(value);
        self
    }

    pub fn signal_strength(mut self, value: i64) -> Self {
        self.signal_strength = Some(value);
        self
    }
}

/// A stored reading
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorReading {
    /// Store-assigned, increasing identifier
    pub id: i64,
    pub device_id: String,
    /// Server-assigned ingestion time
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub fields: SensorFields,
}

/// Read direction for history queries
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    /// Newest first
    #[default]
    Desc,
    /// Oldest first
    Asc,
}

impl SortOrder {
    pub(crate) fn sql(&self) -> &'static str {
        match self {
            SortOrder::Desc => "DESC",
            SortOrder::Asc => "ASC",
        }
    }
}

/// Parameters for a history read: half-open `[since, until)` window plus paging
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: usize,
    pub offset: usize,
    pub order: SortOrder,
}

impl Default for ReadingQuery {
    fn default() -> Self {
        Self {
            since: None,
            until: None,
            limit: 100,
            offset: 0,
            order: SortOrder::Desc,
        }
    }
}

impl ReadingQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    pub fn order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    /// A window is valid unless both ends are set and `since >= until`
    pub fn has_valid_window(&self) -> bool {
        match (self.since, self.until) {
            (Some(since), Some(until)) => since < until,
            _ => true,
        }
    }
}

/// Filter for device listings
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceFilter {
    /// Case-insensitive substring over id, name, location, type and status
    pub search: Option<String>,
    pub status: Option<DeviceStatus>,
    pub device_type: Option<DeviceType>,
    pub limit: usize,
    pub offset: usize,
}

impl Default for DeviceFilter {
    fn default() -> Self {
        Self {
            search: None,
            status: None,
            device_type: None,
            limit: 50,
            offset: 0,
        }
    }
}

/// One page of a listing plus the total number of matches
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub limit: usize,
    pub offset: usize,
}

/// min / max / avg of one channel
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FieldSummary {
    /// Number of readings that carried this channel
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Whole-history (or windowed) summary of one device's readings
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReadingSummary {
    pub reading_count: u64,
    pub first_reading: Option<DateTime<Utc>>,
    pub last_reading: Option<DateTime<Utc>>,
    /// Only channels with at least one value appear
    pub fields: BTreeMap<String, FieldSummary>,
}

/// Convert a UTC timestamp to the stored millisecond representation
pub(crate) fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

/// Decode a stored millisecond timestamp
pub(crate) fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(ms)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parse() {
        assert_eq!("soil".parse::<DeviceType>().unwrap(), DeviceType::Soil);
        assert_eq!("Multi-Sensor".parse::<DeviceType>().unwrap(), DeviceType::Multi);
        assert!("weather".parse::<DeviceType>().is_err());

        for ty in DeviceType::all() {
            assert_eq!(ty.as_str().parse::<DeviceType>().unwrap(), *ty);
        }
    }

    #[test]
    fn test_device_type_serde_alias() {
        let ty: DeviceType = serde_json::from_str("\"multi-sensor\"").unwrap();
        assert_eq!(ty, DeviceType::Multi);
        assert_eq!(serde_json::to_string(&DeviceType::Soil).unwrap(), "\"soil\"");
    }

    #[test]
    fn test_status_accepts_readings() {
        assert!(DeviceStatus::Active.accepts_readings());
        assert!(DeviceStatus::Maintenance.accepts_readings());
        assert!(!DeviceStatus::Inactive.accepts_readings());
    }

    #[test]
    fn test_sensor_fields_populated() {
        let fields = SensorFields::default().temperature(24.5).soil_raw(1800);

        assert_eq!(fields.populated_count(), 2);
        assert!(!fields.is_empty());
        assert_eq!(fields.get(SensorField::SoilRaw), Some(1800.0));
        assert_eq!(fields.get(SensorField::Humidity), None);
        assert!(SensorFields::default().is_empty());
    }

    #[test]
    fn test_reading_serialization_skips_absent_channels() {
        let reading = SensorReading {
            id: 7,
            device_id: "D1".to_string(),
            timestamp: from_millis(1_700_000_000_000).unwrap(),
            fields: SensorFields::default().temperature(24.5),
        };

        let json = serde_json::to_value(&reading).unwrap();
        assert_eq!(json["temperature"], 24.5);
        assert_eq!(json["device_id"], "D1");
        assert!(json.get("humidity").is_none());

        let restored: SensorReading = serde_json::from_value(json).unwrap();
        assert_eq!(restored, reading);
    }

    #[test]
    fn test_reading_query_window() {
        let t0 = from_millis(1_000).unwrap();
        let t1 = from_millis(2_000).unwrap();

        assert!(ReadingQuery::new().has_valid_window());
        assert!(ReadingQuery::new().since(t0).until(t1).has_valid_window());
        assert!(!ReadingQuery::new().since(t1).until(t0).has_valid_window());
        assert!(!ReadingQuery::new().since(t0).until(t0).has_valid_window());
    }

    #[test]
    fn test_device_changes_empty() {
        assert!(DeviceChanges::default().is_empty());
        let changes = DeviceChanges {
            status: Some(DeviceStatus::Maintenance),
            ..Default::default()
        };
        assert!(!changes.is_empty());
    }
}

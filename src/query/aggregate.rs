//! Time-bucketed aggregation of readings
//!
//! Readings are grouped by their UTC timestamp truncated to the bucket start.
//! Each channel is averaged independently over the readings that carry it.

use crate::storage::{SensorField, SensorReading};
use chrono::{DateTime, Duration, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Bucket width
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    #[default]
    Hour,
    Day,
}

impl Bucket {
    /// Truncate a timestamp to the start of its bucket
    pub fn truncate(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let hour = timestamp
            .with_minute(0)
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(timestamp);

        match self {
            Self::Hour => hour,
            Self::Day => hour.with_hour(0).unwrap_or(hour),
        }
    }

    /// Window used when the caller gives no `since`
    pub fn default_span(&self) -> Duration {
        match self {
            Self::Hour => Duration::hours(24),
            Self::Day => Duration::days(30),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hour => "hour",
            Self::Day => "day",
        }
    }
}

impl FromStr for Bucket {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hour" | "h" | "hourly" => Ok(Self::Hour),
            "day" | "d" | "daily" => Ok(Self::Day),
            other => Err(format!("unknown bucket '{}', expected hour or day", other)),
        }
    }
}

impl std::fmt::Display for Bucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bucket of an aggregate series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateBucket {
    /// Bucket start (UTC)
    pub timestamp: DateTime<Utc>,
    /// Readings that fell in the bucket
    pub count: u64,
    /// Per-channel averages; channels without values are absent
    #[serde(flatten)]
    pub averages: BTreeMap<String, f64>,
}

#[derive(Default)]
struct Accumulator {
    count: u64,
    sums: BTreeMap<SensorField, (f64, u64)>,
}

impl Accumulator {
    fn add(&mut self, reading: &SensorReading) {
        self.count += 1;
        for (field, value) in reading.fields.populated() {
            let entry = self.sums.entry(field).or_insert((0.0, 0));
            entry.0 += value;
            entry.1 += 1;
        }
    }

    fn finish(self, timestamp: DateTime<Utc>) -> AggregateBucket {
        let averages = self
            .sums
            .into_iter()
            .map(|(field, (sum, n))| (field.name().to_string(), sum / n as f64))
            .collect();

        AggregateBucket {
            timestamp,
            count: self.count,
            averages,
        }
    }
}

/// Group readings into buckets, returned in chronological order
pub fn aggregate(readings: &[SensorReading], bucket: Bucket) -> Vec<AggregateBucket> {
    let mut groups: BTreeMap<DateTime<Utc>, Accumulator> = BTreeMap::new();

    for reading in readings {
        groups
            .entry(bucket.truncate(reading.timestamp))
            .or_default()
            .add(reading);
    }

    groups
        .into_iter()
        .map(|(timestamp, acc)| acc.finish(timestamp))
        .collect()
}

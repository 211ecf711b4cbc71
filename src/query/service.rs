//! Query Service
//!
//! Read-only access to reading history: paged history, latest reading,
//! bucketed aggregates, per-device statistics and the fleet overview.

use crate::query::aggregate::{aggregate, AggregateBucket, Bucket};
use crate::query::error::{QueryError, QueryResult};
use crate::storage::{
    DeviceStatus, DeviceType, ReadingQuery, ReadingSummary, SensorReading, SortOrder,
    TelemetryStore,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_HISTORY_LIMIT: usize = 100;
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Devices seen within this window count as online
const ONLINE_WINDOW_MINUTES: i64 = 5;

/// History request: half-open `[since, until)` window plus paging
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct HistoryQuery {
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    pub order: SortOrder,
}

/// Per-device statistics
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceStats {
    pub device_id: String,
    /// Start of the window, `None` for whole history
    pub since: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub summary: ReadingSummary,
}

/// Fleet summary for the dashboard
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Overview {
    pub total_devices: u64,
    pub devices_by_status: BTreeMap<String, u64>,
    pub devices_by_type: BTreeMap<String, u64>,
    /// Devices with a reading in the last five minutes
    pub online_devices: u64,
    pub total_readings: u64,
    /// Readings since UTC midnight
    pub readings_today: u64,
    pub generated_at: DateTime<Utc>,
}

/// Read side of the telemetry store
#[derive(Clone)]
pub struct QueryService {
    store: TelemetryStore,
}

impl QueryService {
    pub fn new(store: TelemetryStore) -> Self {
        Self { store }
    }

    async fn ensure_device(&self, device_id: &str) -> QueryResult<()> {
        if self.store.device_exists(device_id).await? {
            Ok(())
        } else {
            Err(QueryError::NotFound(device_id.to_string()))
        }
    }

    /// Paged history, newest first unless `order = asc`
    pub async fn history(
        &self,
        device_id: &str,
        query: HistoryQuery,
    ) -> QueryResult<Vec<SensorReading>> {
        check_window(query.since, query.until)?;
        self.ensure_device(device_id).await?;

        let request = ReadingQuery {
            since: query.since,
            until: query.until,
            limit: query
                .limit
                .unwrap_or(DEFAULT_HISTORY_LIMIT)
                .min(MAX_HISTORY_LIMIT),
            offset: query.offset.unwrap_or(0),
            order: query.order,
        };

        let readings = self.store.readings(device_id, request).await?;
        tracing::debug!(device_id = %device_id, count = readings.len(), "History query");
        Ok(readings)
    }

    /// Readings in a window, oldest first, at most `limit` of them (exports)
    pub async fn range(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> QueryResult<Vec<SensorReading>> {
        check_window(since, until)?;
        self.ensure_device(device_id).await?;
        Ok(self.store.readings_between(device_id, since, until, limit).await?)
    }

    pub async fn latest(&self, device_id: &str) -> QueryResult<Option<SensorReading>> {
        self.ensure_device(device_id).await?;
        Ok(self.store.latest_reading(device_id).await?)
    }

    /// Bucketed per-channel averages in chronological order.
    ///
    /// Without `since` the window starts one default span before `until`
    /// (or now): 24 hours for hourly buckets, 30 days for daily.
    pub async fn aggregate(
        &self,
        device_id: &str,
        bucket: Bucket,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> QueryResult<Vec<AggregateBucket>> {
        check_window(since, until)?;
        self.ensure_device(device_id).await?;

        let since = since.unwrap_or_else(|| until.unwrap_or_else(Utc::now) - bucket.default_span());
        let readings = self
            .store
            .readings_between(device_id, Some(since), until, None)
            .await?;

        let buckets = aggregate(&readings, bucket);
        tracing::debug!(
            device_id = %device_id,
            bucket = %bucket,
            readings = readings.len(),
            buckets = buckets.len(),
            "Aggregate query"
        );
        Ok(buckets)
    }

    /// Whole-history statistics
    pub async fn stats(&self, device_id: &str) -> QueryResult<DeviceStats> {
        self.summarize(device_id, None).await
    }

    /// Statistics over readings at or after `since`
    pub async fn stats_since(&self, device_id: &str, since: DateTime<Utc>) -> QueryResult<DeviceStats> {
        self.summarize(device_id, Some(since)).await
    }

    async fn summarize(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> QueryResult<DeviceStats> {
        self.ensure_device(device_id).await?;
        let summary = self.store.reading_summary(device_id, since).await?;
        Ok(DeviceStats {
            device_id: device_id.to_string(),
            since,
            summary,
        })
    }

    /// Fleet-wide counts
    pub async fn overview(&self) -> QueryResult<Overview> {
        let now = Utc::now();
        let midnight = now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or(now);

        let counts = self.store.device_counts().await?;
        let online_devices = self
            .store
            .devices_seen_since(now - Duration::minutes(ONLINE_WINDOW_MINUTES))
            .await?;
        let total_readings = self.store.reading_count(None).await?;
        let readings_today = self.store.reading_count(Some(midnight)).await?;

        let mut devices_by_status: BTreeMap<String, u64> = DeviceStatus::all()
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        let mut devices_by_type: BTreeMap<String, u64> = DeviceType::all()
            .iter()
            .map(|t| (t.to_string(), 0))
            .collect();

        let mut total_devices = 0;
        for (device_type, status, count) in counts {
            total_devices += count;
            *devices_by_status.entry(status.to_string()).or_default() += count;
            *devices_by_type.entry(device_type.to_string()).or_default() += count;
        }

        Ok(Overview {
            total_devices,
            devices_by_status,
            devices_by_type,
            online_devices,
            total_readings,
            readings_today,
            generated_at: now,
        })
    }
}

fn check_window(since: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> QueryResult<()> {
    match (since, until) {
        (Some(since), Some(until)) if since >= until => Err(QueryError::InvalidTimeRange(format!(
            "since ({}) must be before until ({})",
            since.to_rfc3339(),
            until.to_rfc3339()
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{DeviceRegistration, DeviceRegistry};
    use crate::storage::{SensorFields, StorageConfig};
    use chrono::TimeZone;
    use tempfile::tempdir;

    async fn create_test_service() -> (QueryService, DeviceRegistry, TelemetryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = TelemetryStore::open(StorageConfig::new(dir.path()))
            .await
            .unwrap();
        let registry = DeviceRegistry::new(store.clone());
        (QueryService::new(store.clone()), registry, store, dir)
    }

    #[tokio::test]
    async fn test_unknown_device_not_found() {
        let (service, _registry, _store, _dir) = create_test_service().await;

        assert!(matches!(
            service.history("ghost", HistoryQuery::default()).await,
            Err(QueryError::NotFound(_))
        ));
        assert!(matches!(service.latest("ghost").await, Err(QueryError::NotFound(_))));
        assert!(matches!(service.stats("ghost").await, Err(QueryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_invalid_window_rejected() {
        let (service, registry, _store, _dir) = create_test_service().await;
        registry.register(DeviceRegistration::new("D1", "Field sensor")).await.unwrap();

        let t = Utc::now();
        let query = HistoryQuery {
            since: Some(t),
            until: Some(t),
            ..Default::default()
        };
        assert!(matches!(
            service.history("D1", query).await,
            Err(QueryError::InvalidTimeRange(_))
        ));
        assert!(matches!(
            service.aggregate("D1", Bucket::Hour, Some(t), Some(t - Duration::hours(1))).await,
            Err(QueryError::InvalidTimeRange(_))
        ));
    }

    #[tokio::test]
    async fn test_history_limit_capped() {
        let (service, registry, store, _dir) = create_test_service().await;
        registry.register(DeviceRegistration::new("D1", "Field sensor")).await.unwrap();

        let base = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        for i in 0..1005 {
            store
                .import_reading("D1", SensorFields::default().humidity(50.0), base + Duration::seconds(i))
                .await
                .unwrap();
        }

        let default = service.history("D1", HistoryQuery::default()).await.unwrap();
        assert_eq!(default.len(), DEFAULT_HISTORY_LIMIT);
        assert!(default[0].timestamp > default[1].timestamp);

        let capped = service
            .history(
                "D1",
                HistoryQuery {
                    limit: Some(5000),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(capped.len(), MAX_HISTORY_LIMIT);
    }

    #[tokio::test]
    async fn test_hourly_aggregate_matches_manual_means() {
        let (service, registry, store, _dir) = create_test_service().await;
        registry.register(DeviceRegistration::new("D1", "Field sensor")).await.unwrap();

        let start = Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap();
        let samples = [
            (0, 20.0, Some(40.0)),
            (15, 22.0, None),
            (45, 24.0, Some(44.0)),
            (61, 30.0, Some(60.0)),
            (119, 32.0, None),
        ];
        for (minute, temp, humidity) in samples {
            let mut fields = SensorFields::default().temperature(temp);
            fields.humidity = humidity;
            store
                .import_reading("D1", fields, start + Duration::minutes(minute))
                .await
                .unwrap();
        }

        let buckets = service
            .aggregate("D1", Bucket::Hour, Some(start), Some(start + Duration::hours(2)))
            .await
            .unwrap();

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].timestamp, start);
        assert_eq!(buckets[0].count, 3);
        assert!((buckets[0].averages["temperature"] - 22.0).abs() < 1e-9);
        assert!((buckets[0].averages["humidity"] - 42.0).abs() < 1e-9);

        assert_eq!(buckets[1].timestamp, start + Duration::hours(1));
        assert_eq!(buckets[1].count, 2);
        assert!((buckets[1].averages["temperature"] - 31.0).abs() < 1e-9);
        assert!((buckets[1].averages["humidity"] - 60.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_stats_and_window() {
        let (service, registry, store, _dir) = create_test_service().await;
        registry.register(DeviceRegistration::new("D1", "Field sensor")).await.unwrap();

        let now = Utc::now();
        store
            .import_reading("D1", SensorFields::default().temperature(10.0), now - Duration::hours(48))
            .await
            .unwrap();
        store
            .import_reading("D1", SensorFields::default().temperature(30.0), now - Duration::hours(1))
            .await
            .unwrap();

        let all = service.stats("D1").await.unwrap();
        assert_eq!(all.summary.reading_count, 2);
        assert_eq!(all.summary.fields["temperature"].avg, 20.0);

        let recent = service
            .stats_since("D1", now - Duration::hours(24))
            .await
            .unwrap();
        assert_eq!(recent.summary.reading_count, 1);
        assert_eq!(recent.summary.fields["temperature"].min, 30.0);
    }

    #[tokio::test]
    async fn test_latest_empty_device() {
        let (service, registry, _store, _dir) = create_test_service().await;
        registry.register(DeviceRegistration::new("D1", "Field sensor")).await.unwrap();
        assert_eq!(service.latest("D1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overview_counts() {
        let (service, registry, store, _dir) = create_test_service().await;

        let key = registry
            .register(DeviceRegistration::new("D1", "Field sensor").with_type(DeviceType::Soil))
            .await
            .unwrap()
            .api_key
            .unwrap();
        registry.register(DeviceRegistration::new("D2", "Field sensor")).await.unwrap();
        registry.update_status("D2", DeviceStatus::Maintenance).await.unwrap();

        store
            .append_reading("D1", &key, SensorFields::default().soil_moisture(33.0))
            .await
            .unwrap();
        store
            .import_reading("D2", SensorFields::default().humidity(50.0), Utc::now() - Duration::days(3))
            .await
            .unwrap();

        let overview = service.overview().await.unwrap();
        assert_eq!(overview.total_devices, 2);
        assert_eq!(overview.devices_by_status["active"], 1);
        assert_eq!(overview.devices_by_status["maintenance"], 1);
        assert_eq!(overview.devices_by_status["inactive"], 0);
        assert_eq!(overview.devices_by_type["soil"], 1);
        assert_eq!(overview.devices_by_type["multi"], 1);
        assert_eq!(overview.online_devices, 1);
        assert_eq!(overview.total_readings, 2);
        assert_eq!(overview.readings_today, 1);
    }
}

//! Agrotel Telemetry Store
//!
//! Embedded SQLite holding the device registry and the reading history:
//! - Write path: credential re-check → monotonic timestamp → INSERT reading → last_seen
//! - Read path: `(device_id, timestamp DESC)` index → rows → `SensorReading`
//!
//! Connections come from an `r2d2` pool and are only ever touched from
//! `tokio::task::spawn_blocking`. Each task holds its own connection; SQLite's
//! WAL mode and `busy_timeout` arbitrate between them, so a slow reader never
//! stalls an unrelated device.

use crate::storage::error::{StorageError, StorageResult};
use crate::storage::schema;
use crate::storage::types::{
    from_millis, to_millis, Device, DeviceChanges, DeviceFilter, DeviceStatus, DeviceType,
    FieldSummary, NewDevice, ReadingQuery, ReadingSummary, SensorField, SensorFields,
    SensorReading,
};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the telemetry store
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for the database file
    pub data_dir: PathBuf,
    /// How long SQLite waits on a locked database before failing
    pub busy_timeout_ms: u64,
    /// Maximum number of open connections
    pub pool_size: u32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("agrotel_data"),
            busy_timeout_ms: 5000,
            pool_size: 8,
        }
    }
}

impl StorageConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Get path to the SQLite database file
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("agrotel.db")
    }
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StorageStats {
    pub device_count: u64,
    pub reading_count: u64,
    pub database_size_bytes: u64,
}

const DEVICE_COLUMNS: &str =
    "device_id, device_name, device_type, location, status, registered_at, last_seen";

const READING_COLUMNS: &str = "id, device_id, timestamp, temperature, humidity, soil_moisture, \
     soil_raw, battery_level, signal_strength";

/// SQLite-backed store for devices and readings
#[derive(Clone)]
pub struct TelemetryStore {
    pool: Pool<SqliteConnectionManager>,
    config: StorageConfig,
}

impl TelemetryStore {
    /// Open (or create) the store and apply pending migrations
    pub async fn open(config: StorageConfig) -> StorageResult<Self> {
        let open_config = config.clone();
        let pool = tokio::task::spawn_blocking(move || Self::open_pool(&open_config)).await??;

        tracing::info!(
            path = %config.database_path().display(),
            pool_size = config.pool_size,
            "Telemetry store opened"
        );

        Ok(Self { pool, config })
    }

    fn open_pool(config: &StorageConfig) -> StorageResult<Pool<SqliteConnectionManager>> {
        std::fs::create_dir_all(&config.data_dir)?;

        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(config.database_path())
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .with_init(move |conn| {
                conn.busy_timeout(busy_timeout)?;
                conn.execute_batch(
                    "
                    PRAGMA journal_mode = WAL;
                    PRAGMA synchronous = NORMAL;
                    PRAGMA foreign_keys = ON;
                    PRAGMA temp_store = MEMORY;
                    ",
                )
            });

        let pool = Pool::builder()
            .max_size(config.pool_size.max(1))
            .min_idle(Some(1))
            .connection_timeout(busy_timeout.max(Duration::from_secs(1)))
            .build(manager)?;

        let conn = pool.get()?;
        schema::migrate(&conn)?;

        Ok(pool)
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Run a closure against a pooled connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> StorageResult<T>
    where
        F: FnOnce(&mut Connection) -> StorageResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool.get()?;
            f(&mut conn)
        })
        .await?
    }

    // ------------------------------------------------------------------
    // Devices
    // ------------------------------------------------------------------

    /// Insert a new device. Uniqueness violations surface as `StorageError::Conflict`.
    pub async fn insert_device(&self, device: NewDevice) -> StorageResult<Device> {
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO devices
                    (device_id, device_name, device_type, location, status, api_key, registered_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    device.device_id,
                    device.device_name,
                    device.device_type,
                    device.location,
                    device.status,
                    device.api_key,
                    to_millis(device.registered_at),
                ],
            )?;

            Ok(Device {
                device_id: device.device_id,
                device_name: device.device_name,
                device_type: device.device_type,
                location: device.location,
                status: device.status,
                registered_at: from_millis(to_millis(device.registered_at))
                    .unwrap_or(device.registered_at),
                last_seen: None,
            })
        })
        .await
    }

    /// Apply a partial update. An empty `location` clears it.
    ///
    /// Returns `None` if the device does not exist.
    pub async fn update_device(
        &self,
        device_id: &str,
        changes: DeviceChanges,
    ) -> StorageResult<Option<Device>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let updated = tx.execute(
                "UPDATE devices SET
                    device_name = COALESCE(?1, device_name),
                    device_type = COALESCE(?2, device_type),
                    location = CASE
                        WHEN ?3 IS NULL THEN location
                        WHEN ?3 = '' THEN NULL
                        ELSE ?3
                    END,
                    status = COALESCE(?4, status)
                 WHERE device_id = ?5",
                params![
                    changes.device_name,
                    changes.device_type,
                    changes.location,
                    changes.status,
                    device_id,
                ],
            )?;

            if updated == 0 {
                return Ok(None);
            }

            let device = select_device(&tx, &device_id)?;
            tx.commit()?;
            Ok(device)
        })
        .await
    }

    /// Replace the API key. Returns `false` if the device does not exist.
    pub async fn set_api_key(&self, device_id: &str, api_key: String) -> StorageResult<bool> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let updated = conn.execute(
                "UPDATE devices SET api_key = ?1 WHERE device_id = ?2",
                params![api_key, device_id],
            )?;
            Ok(updated > 0)
        })
        .await
    }

    /// Get a device by its external id
    pub async fn get_device(&self, device_id: &str) -> StorageResult<Option<Device>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| select_device(conn, &device_id))
            .await
    }

    /// Get a device together with its current API key
    pub async fn find_credentials(&self, device_id: &str) -> StorageResult<Option<(Device, String)>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {}, api_key FROM devices WHERE device_id = ?1",
                DEVICE_COLUMNS
            ))?;
            let found = stmt
                .query_row(params![device_id], |row| {
                    Ok((device_from_row(row)?, row.get::<_, String>(7)?))
                })
                .optional()?;
            Ok(found)
        })
        .await
    }

    /// List devices matching a filter, most recently seen first.
    ///
    /// Returns the requested page and the total number of matches.
    pub async fn list_devices(&self, filter: DeviceFilter) -> StorageResult<(Vec<Device>, u64)> {
        self.with_conn(move |conn| {
            let pattern = filter
                .search
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(like_pattern);

            let predicate = "(?1 IS NULL
                    OR device_id LIKE ?1 ESCAPE '\\'
                    OR device_name LIKE ?1 ESCAPE '\\'
                    OR location LIKE ?1 ESCAPE '\\'
                    OR device_type LIKE ?1 ESCAPE '\\'
                    OR status LIKE ?1 ESCAPE '\\')
                AND (?2 IS NULL OR status = ?2)
                AND (?3 IS NULL OR device_type = ?3)";

            let total: i64 = conn.query_row(
                &format!("SELECT COUNT(*) FROM devices WHERE {}", predicate),
                params![pattern, filter.status, filter.device_type],
                |row| row.get(0),
            )?;

            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM devices WHERE {}
                 ORDER BY last_seen IS NULL, last_seen DESC, device_id
                 LIMIT ?4 OFFSET ?5",
                DEVICE_COLUMNS, predicate
            ))?;
            let devices = stmt
                .query_map(
                    params![
                        pattern,
                        filter.status,
                        filter.device_type,
                        filter.limit as i64,
                        filter.offset as i64,
                    ],
                    device_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;

            Ok((devices, total as u64))
        })
        .await
    }

    /// Delete a device and, through the foreign key, all of its readings
    pub async fn delete_device(&self, device_id: &str) -> StorageResult<bool> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn.execute("DELETE FROM devices WHERE device_id = ?1", params![device_id])?;
            Ok(deleted > 0)
        })
        .await
    }

    pub async fn device_exists(&self, device_id: &str) -> StorageResult<bool> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| device_exists(conn, &device_id))
            .await
    }

    /// Device totals grouped by (type, status)
    pub async fn device_counts(&self) -> StorageResult<Vec<(DeviceType, DeviceStatus, u64)>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare_cached(
                "SELECT device_type, status, COUNT(*) FROM devices GROUP BY device_type, status",
            )?;
            let counts = stmt
                .query_map([], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? as u64))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(counts)
        })
        .await
    }

    /// Number of devices with `last_seen >= since`
    pub async fn devices_seen_since(&self, since: DateTime<Utc>) -> StorageResult<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM devices WHERE last_seen >= ?1",
                params![to_millis(since)],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    // ------------------------------------------------------------------
    // Readings
    // ------------------------------------------------------------------

    /// Append a reading stamped with the server clock.
    ///
    /// The credential is re-checked inside the write transaction, so a key
    /// rotated after authentication still rejects the write. The timestamp is
    /// `max(now, latest stored timestamp for the device)` and becomes the
    /// device's `last_seen`.
    pub async fn append_reading(
        &self,
        device_id: &str,
        api_key: &str,
        fields: SensorFields,
    ) -> StorageResult<SensorReading> {
        let device_id = device_id.to_string();
        let api_key = api_key.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

            let latest: Option<i64> = tx.query_row(
                "SELECT MAX(timestamp) FROM readings WHERE device_id = ?1",
                params![device_id],
                |row| row.get(0),
            )?;
            let now = to_millis(Utc::now());
            let timestamp = latest.map_or(now, |latest| latest.max(now));

            let updated = tx.execute(
                "UPDATE devices SET last_seen = ?1
                 WHERE device_id = ?2 AND api_key = ?3 AND status != 'inactive'",
                params![timestamp, device_id, api_key],
            )?;

            if updated == 0 {
                return Err(if device_exists(&tx, &device_id)? {
                    StorageError::CredentialRejected(device_id)
                } else {
                    StorageError::DeviceNotFound(device_id)
                });
            }

            let reading = insert_reading(&tx, device_id, timestamp, fields)?;
            tx.commit()?;
            Ok(reading)
        })
        .await
    }

    /// Insert a reading with an explicit timestamp. `last_seen` only moves forward.
    #[cfg(test)]
    pub(crate) async fn import_reading(
        &self,
        device_id: &str,
        fields: SensorFields,
        timestamp: DateTime<Utc>,
    ) -> StorageResult<SensorReading> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let timestamp = to_millis(timestamp);

            let updated = tx.execute(
                "UPDATE devices SET last_seen = MAX(COALESCE(last_seen, ?1), ?1)
                 WHERE device_id = ?2",
                params![timestamp, device_id],
            )?;
            if updated == 0 {
                return Err(StorageError::DeviceNotFound(device_id));
            }

            let reading = insert_reading(&tx, device_id, timestamp, fields)?;
            tx.commit()?;
            Ok(reading)
        })
        .await
    }

    /// Readings of one device in `[since, until)`, paged and ordered by
    /// timestamp with ties broken by id.
    pub async fn readings(
        &self,
        device_id: &str,
        query: ReadingQuery,
    ) -> StorageResult<Vec<SensorReading>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let order = query.order.sql();
            let sql = format!(
                "SELECT {} FROM readings
                 WHERE device_id = ?1
                   AND (?2 IS NULL OR timestamp >= ?2)
                   AND (?3 IS NULL OR timestamp < ?3)
                 ORDER BY timestamp {order}, id {order}
                 LIMIT ?4 OFFSET ?5",
                READING_COLUMNS,
                order = order
            );
            let mut stmt = conn.prepare_cached(&sql)?;
            let readings = stmt
                .query_map(
                    params![
                        device_id,
                        query.since.map(to_millis),
                        query.until.map(to_millis),
                        query.limit as i64,
                        query.offset as i64,
                    ],
                    reading_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(readings)
        })
        .await
    }

    /// Every reading of one device in `[since, until)`, oldest first
    pub async fn readings_between(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
        limit: Option<usize>,
    ) -> StorageResult<Vec<SensorReading>> {
        let device_id = device_id.to_string();
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map_or(-1, |l| i64::try_from(l).unwrap_or(i64::MAX));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare_cached(&format!(
                "SELECT {} FROM readings
                 WHERE device_id = ?1
                   AND (?2 IS NULL OR timestamp >= ?2)
                   AND (?3 IS NULL OR timestamp < ?3)
                 ORDER BY timestamp ASC, id ASC
                 LIMIT ?4",
                READING_COLUMNS
            ))?;
            let readings = stmt
                .query_map(
                    params![device_id, since.map(to_millis), until.map(to_millis), limit],
                    reading_from_row,
                )?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(readings)
        })
        .await
    }

    /// Most recent reading of a device
    pub async fn latest_reading(&self, device_id: &str) -> StorageResult<Option<SensorReading>> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| select_latest(conn, &device_id))
            .await
    }

    /// Most recent reading for each of several devices
    pub async fn latest_readings(
        &self,
        device_ids: Vec<String>,
    ) -> StorageResult<HashMap<String, SensorReading>> {
        self.with_conn(move |conn| {
            let mut latest = HashMap::with_capacity(device_ids.len());
            for device_id in device_ids {
                if let Some(reading) = select_latest(conn, &device_id)? {
                    latest.insert(device_id, reading);
                }
            }
            Ok(latest)
        })
        .await
    }

    /// Count, first/last timestamps and per-channel min/max/avg, optionally
    /// restricted to readings at or after `since`.
    pub async fn reading_summary(
        &self,
        device_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> StorageResult<ReadingSummary> {
        let device_id = device_id.to_string();
        self.with_conn(move |conn| {
            let mut columns = vec![
                "COUNT(*)".to_string(),
                "MIN(timestamp)".to_string(),
                "MAX(timestamp)".to_string(),
            ];
            for field in SensorField::ALL {
                let name = field.name();
                columns.push(format!(
                    "COUNT({name}), MIN({name}), MAX({name}), AVG({name})",
                    name = name
                ));
            }
            let sql = format!(
                "SELECT {} FROM readings WHERE device_id = ?1 AND (?2 IS NULL OR timestamp >= ?2)",
                columns.join(", ")
            );

            let mut stmt = conn.prepare_cached(&sql)?;
            let summary = stmt.query_row(params![device_id, since.map(to_millis)], |row| {
                let reading_count: i64 = row.get(0)?;
                let first_reading = optional_millis_column(row, 1)?;
                let last_reading = optional_millis_column(row, 2)?;

                let mut fields = BTreeMap::new();
                for (i, field) in SensorField::ALL.iter().enumerate() {
                    let base = 3 + i * 4;
                    let count: i64 = row.get(base)?;
                    if count == 0 {
                        continue;
                    }
                    fields.insert(
                        field.name().to_string(),
                        FieldSummary {
                            count: count as u64,
                            min: row.get(base + 1)?,
                            max: row.get(base + 2)?,
                            avg: row.get(base + 3)?,
                        },
                    );
                }

                Ok(ReadingSummary {
                    reading_count: reading_count as u64,
                    first_reading,
                    last_reading,
                    fields,
                })
            })?;
            Ok(summary)
        })
        .await
    }

    /// Total readings, optionally only those at or after `since`
    pub async fn reading_count(&self, since: Option<DateTime<Utc>>) -> StorageResult<u64> {
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM readings WHERE ?1 IS NULL OR timestamp >= ?1",
                params![since.map(to_millis)],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
        .await
    }

    /// Get store statistics
    pub async fn stats(&self) -> StorageResult<StorageStats> {
        let path = self.config.database_path();
        self.with_conn(move |conn| {
            let device_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM devices", [], |row| row.get(0))?;
            let reading_count: i64 =
                conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get(0))?;
            let database_size_bytes = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

            Ok(StorageStats {
                device_count: device_count as u64,
                reading_count: reading_count as u64,
                database_size_bytes,
            })
        })
        .await
    }

    /// Cheap liveness probe for the readiness endpoint
    pub async fn ping(&self) -> StorageResult<()> {
        self.with_conn(|conn| {
            conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))?;
            Ok(())
        })
        .await
    }
}

fn device_exists(conn: &Connection, device_id: &str) -> StorageResult<bool> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM devices WHERE device_id = ?1",
            params![device_id],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    Ok(exists)
}

fn select_device(conn: &Connection, device_id: &str) -> StorageResult<Option<Device>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM devices WHERE device_id = ?1",
        DEVICE_COLUMNS
    ))?;
    Ok(stmt.query_row(params![device_id], device_from_row).optional()?)
}

fn select_latest(conn: &Connection, device_id: &str) -> StorageResult<Option<SensorReading>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {} FROM readings WHERE device_id = ?1
         ORDER BY timestamp DESC, id DESC LIMIT 1",
        READING_COLUMNS
    ))?;
    Ok(stmt.query_row(params![device_id], reading_from_row).optional()?)
}

fn insert_reading(
    conn: &Connection,
    device_id: String,
    timestamp: i64,
    fields: SensorFields,
) -> StorageResult<SensorReading> {
    conn.execute(
        "INSERT INTO readings
            (device_id, timestamp, temperature, humidity, soil_moisture,
             soil_raw, battery_level, signal_strength)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            device_id,
            timestamp,
            fields.temperature,
            fields.humidity,
            fields.soil_moisture,
            fields.soil_raw,
            fields.battery_level,
            fields.signal_strength,
        ],
    )?;

    let timestamp = from_millis(timestamp)
        .ok_or_else(|| StorageError::Corruption(format!("timestamp {} out of range", timestamp)))?;

    Ok(SensorReading {
        id: conn.last_insert_rowid(),
        device_id,
        timestamp,
        fields,
    })
}

fn millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    from_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {} out of range", ms).into(),
        )
    })
}

fn optional_millis_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => millis_column(row, idx).map(Some),
        None => Ok(None),
    }
}

fn device_from_row(row: &Row<'_>) -> rusqlite::Result<Device> {
    Ok(Device {
        device_id: row.get(0)?,
        device_name: row.get(1)?,
        device_type: row.get(2)?,
        location: row.get(3)?,
        status: row.get(4)?,
        registered_at: millis_column(row, 5)?,
        last_seen: optional_millis_column(row, 6)?,
    })
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<SensorReading> {
    Ok(SensorReading {
        id: row.get(0)?,
        device_id: row.get(1)?,
        timestamp: millis_column(row, 2)?,
        fields: SensorFields {
            temperature: row.get(3)?,
            humidity: row.get(4)?,
            soil_moisture: row.get(5)?,
            soil_raw: row.get(6)?,
            battery_level: row.get(7)?,
            signal_strength: row.get(8)?,
        },
    })
}

/// `%term%` with LIKE wildcards in the term escaped
fn like_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    async fn create_test_store() -> (TelemetryStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = TelemetryStore::open(StorageConfig::new(dir.path()))
            .await
            .unwrap();
        (store, dir)
    }

    fn new_device(device_id: &str, api_key: &str) -> NewDevice {
        NewDevice {
            device_id: device_id.to_string(),
            device_name: format!("{} probe", device_id),
            device_type: DeviceType::Multi,
            location: Some("Garden A".to_string()),
            status: DeviceStatus::Active,
            api_key: api_key.to_string(),
            registered_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_insert_and_get_device() {
        let (store, _dir) = create_test_store().await;

        let device = store.insert_device(new_device("ESP32-001", "key-1")).await.unwrap();
        assert_eq!(device.last_seen, None);

        let fetched = store.get_device("ESP32-001").await.unwrap().unwrap();
        assert_eq!(fetched, device);
        assert!(store.get_device("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unique_constraints() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let err = store.insert_device(new_device("D1", "key-2")).await.unwrap_err();
        assert!(err.is_conflict_on("device_id"), "got {:?}", err);

        let err = store.insert_device(new_device("D2", "key-1")).await.unwrap_err();
        assert!(err.is_conflict_on("api_key"), "got {:?}", err);
    }

    #[tokio::test]
    async fn test_append_updates_last_seen() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let reading = store
            .append_reading("D1", "key-1", SensorFields::default().temperature(24.5))
            .await
            .unwrap();

        let device = store.get_device("D1").await.unwrap().unwrap();
        assert_eq!(device.last_seen, Some(reading.timestamp));
        assert_eq!(reading.fields.temperature, Some(24.5));
        assert_eq!(reading.fields.humidity, None);
    }

    #[tokio::test]
    async fn test_append_rechecks_credential() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();
        assert!(store.set_api_key("D1", "key-2".to_string()).await.unwrap());

        let err = store
            .append_reading("D1", "key-1", SensorFields::default().humidity(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CredentialRejected(_)));

        let err = store
            .append_reading("ghost", "key-1", SensorFields::default().humidity(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::DeviceNotFound(_)));

        assert_eq!(store.reading_count(None).await.unwrap(), 0);
        assert_eq!(store.get_device("D1").await.unwrap().unwrap().last_seen, None);
    }

    #[tokio::test]
    async fn test_append_rejects_inactive_device() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();
        store
            .update_device(
                "D1",
                DeviceChanges {
                    status: Some(DeviceStatus::Inactive),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let err = store
            .append_reading("D1", "key-1", SensorFields::default().humidity(50.0))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::CredentialRejected(_)));
    }

    #[tokio::test]
    async fn test_timestamps_never_go_backwards() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let future = Utc::now() + ChronoDuration::hours(1);
        store
            .import_reading("D1", SensorFields::default().temperature(20.0), future)
            .await
            .unwrap();

        let reading = store
            .append_reading("D1", "key-1", SensorFields::default().temperature(21.0))
            .await
            .unwrap();
        assert!(reading.timestamp >= from_millis(to_millis(future)).unwrap());
    }

    #[tokio::test]
    async fn test_readings_window_and_order() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let base = from_millis(1_700_000_000_000).unwrap();
        for i in 0..5 {
            store
                .import_reading(
                    "D1",
                    SensorFields::default().temperature(i as f64),
                    base + ChronoDuration::minutes(i),
                )
                .await
                .unwrap();
        }

        let newest_first = store.readings("D1", ReadingQuery::new()).await.unwrap();
        assert_eq!(newest_first.len(), 5);
        assert_eq!(newest_first[0].fields.temperature, Some(4.0));

        // [base+1m, base+3m) holds exactly two readings
        let window = ReadingQuery::new()
            .since(base + ChronoDuration::minutes(1))
            .until(base + ChronoDuration::minutes(3))
            .order(crate::storage::SortOrder::Asc);
        let readings = store.readings("D1", window).await.unwrap();
        let temps: Vec<_> = readings.iter().map(|r| r.fields.temperature).collect();
        assert_eq!(temps, vec![Some(1.0), Some(2.0)]);

        let page = store
            .readings("D1", ReadingQuery::new().limit(2).offset(1))
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].fields.temperature, Some(3.0));
    }

    #[tokio::test]
    async fn test_equal_timestamps_ordered_by_id() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let ts = from_millis(1_700_000_000_000).unwrap();
        let first = store
            .import_reading("D1", SensorFields::default().humidity(1.0), ts)
            .await
            .unwrap();
        let second = store
            .import_reading("D1", SensorFields::default().humidity(2.0), ts)
            .await
            .unwrap();

        let latest = store.latest_reading("D1").await.unwrap().unwrap();
        assert_eq!(latest.id, second.id);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_reading_summary() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        for (temp, raw) in [(10.0, 1000), (20.0, 2000), (30.0, 3000)] {
            store
                .append_reading(
                    "D1",
                    "key-1",
                    SensorFields::default().temperature(temp).soil_raw(raw),
                )
                .await
                .unwrap();
        }
        store
            .append_reading("D1", "key-1", SensorFields::default().battery_level(80.0))
            .await
            .unwrap();

        let summary = store.reading_summary("D1", None).await.unwrap();
        assert_eq!(summary.reading_count, 4);
        assert!(summary.first_reading <= summary.last_reading);

        let temp = &summary.fields["temperature"];
        assert_eq!(temp.count, 3);
        assert_eq!(temp.min, 10.0);
        assert_eq!(temp.max, 30.0);
        assert!((temp.avg - 20.0).abs() < 1e-9);

        assert_eq!(summary.fields["soil_raw"].max, 3000.0);
        assert_eq!(summary.fields["battery_level"].count, 1);
        assert!(!summary.fields.contains_key("humidity"));

        let empty = store.reading_summary("D1", Some(Utc::now() + ChronoDuration::days(1))).await.unwrap();
        assert_eq!(empty.reading_count, 0);
        assert!(empty.fields.is_empty());
        assert_eq!(empty.first_reading, None);
    }

    #[tokio::test]
    async fn test_update_device_partial() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();

        let updated = store
            .update_device(
                "D1",
                DeviceChanges {
                    device_name: Some("Renamed".to_string()),
                    location: Some(String::new()),
                    ..Default::default()
                },
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(updated.device_name, "Renamed");
        assert_eq!(updated.location, None);
        assert_eq!(updated.device_type, DeviceType::Multi);

        assert!(store
            .update_device("ghost", DeviceChanges::default())
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_list_devices_filter_and_order() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("alpha", "k1")).await.unwrap();
        store.insert_device(new_device("beta", "k2")).await.unwrap();
        let mut soil = new_device("gamma_soil", "k3");
        soil.device_type = DeviceType::Soil;
        soil.location = Some("Greenhouse".to_string());
        store.insert_device(soil).await.unwrap();

        store
            .append_reading("beta", "k2", SensorFields::default().humidity(40.0))
            .await
            .unwrap();

        let (all, total) = store.list_devices(DeviceFilter::default()).await.unwrap();
        assert_eq!(total, 3);
        // Seen devices first, never-seen ordered by id
        let ids: Vec<_> = all.iter().map(|d| d.device_id.as_str()).collect();
        assert_eq!(ids, vec!["beta", "alpha", "gamma_soil"]);

        let filter = DeviceFilter {
            search: Some("GREENHOUSE".to_string()),
            ..Default::default()
        };
        let (found, total) = store.list_devices(filter).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(found[0].device_id, "gamma_soil");

        // Underscore is literal, not a wildcard
        let filter = DeviceFilter {
            search: Some("a_s".to_string()),
            ..Default::default()
        };
        assert_eq!(store.list_devices(filter).await.unwrap().1, 1);

        let filter = DeviceFilter {
            device_type: Some(DeviceType::Multi),
            limit: 1,
            ..Default::default()
        };
        let (page, total) = store.list_devices(filter).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_readings() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();
        store
            .append_reading("D1", "key-1", SensorFields::default().humidity(40.0))
            .await
            .unwrap();

        assert!(store.delete_device("D1").await.unwrap());
        assert!(!store.delete_device("D1").await.unwrap());
        assert_eq!(store.reading_count(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_persistence() {
        let dir = tempdir().unwrap();
        let config = StorageConfig::new(dir.path());

        {
            let store = TelemetryStore::open(config.clone()).await.unwrap();
            store.insert_device(new_device("D1", "key-1")).await.unwrap();
            for i in 0..10 {
                store
                    .append_reading("D1", "key-1", SensorFields::default().temperature(i as f64))
                    .await
                    .unwrap();
            }
        }

        {
            let store = TelemetryStore::open(config).await.unwrap();
            let stats = store.stats().await.unwrap();
            assert_eq!(stats.device_count, 1);
            assert_eq!(stats.reading_count, 10);
            assert!(stats.database_size_bytes > 0);

            let (device, key) = store.find_credentials("D1").await.unwrap().unwrap();
            assert_eq!(device.device_id, "D1");
            assert_eq!(key, "key-1");
        }
    }

    #[tokio::test]
    async fn test_slow_operation_does_not_block_other_devices() {
        let (store, _dir) = create_test_store().await;
        store.insert_device(new_device("D1", "key-1")).await.unwrap();
        store
            .append_reading("D1", "key-1", SensorFields::default().temperature(21.0))
            .await
            .unwrap();

        let slow = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .with_conn(|conn| {
                        conn.query_row("SELECT COUNT(*) FROM readings", [], |row| row.get::<_, i64>(0))?;
                        std::thread::sleep(std::time::Duration::from_millis(500));
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let started = std::time::Instant::now();
        let latest = store.latest_reading("D1").await.unwrap().unwrap();
        assert_eq!(latest.fields.temperature, Some(21.0));
        assert!(
            started.elapsed() < std::time::Duration::from_millis(200),
            "read waited {:?}",
            started.elapsed()
        );

        slow.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_appends_across_connections() {
        let (store, _dir) = create_test_store().await;
        for d in 0..4 {
            store
                .insert_device(new_device(&format!("D{}", d), &format!("key-{}", d)))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for i in 0..40 {
            let store = store.clone();
            let d = i % 4;
            tasks.push(tokio::spawn(async move {
                store
                    .append_reading(
                        &format!("D{}", d),
                        &format!("key-{}", d),
                        SensorFields::default().humidity(i as f64),
                    )
                    .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(store.stats().await.unwrap().reading_count, 40);
        assert_eq!(store.reading_count(None).await.unwrap(), 40);
    }

    #[test]
    fn test_like_pattern_escapes_wildcards() {
        assert_eq!(like_pattern("abc"), "%abc%");
        assert_eq!(like_pattern("a_b%c"), "%a\\_b\\%c%");
    }
}

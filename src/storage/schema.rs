//! SQLite schema and migrations
//!
//! Migrations are applied in order and tracked through `PRAGMA user_version`.

use crate::storage::error::StorageResult;
use rusqlite::Connection;

pub const MIGRATIONS: &[&str] = &[V1];

// language=sql
const V1: &str = r#"
    CREATE TABLE IF NOT EXISTS devices (
        device_id TEXT NOT NULL PRIMARY KEY,
        device_name TEXT NOT NULL,
        device_type TEXT NOT NULL DEFAULT 'multi',
        location TEXT DEFAULT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        api_key TEXT NOT NULL UNIQUE,
        registered_at INTEGER NOT NULL, -- unix time, milliseconds
        last_seen INTEGER DEFAULT NULL -- unix time, milliseconds
    );

    CREATE INDEX IF NOT EXISTS devices_last_seen
        ON devices (last_seen DESC);

    CREATE TABLE IF NOT EXISTS readings (
        id INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL REFERENCES devices (device_id) ON DELETE CASCADE,
        timestamp INTEGER NOT NULL, -- unix time, milliseconds
        temperature REAL DEFAULT NULL,
        humidity REAL DEFAULT NULL,
        soil_moisture REAL DEFAULT NULL,
        soil_raw INTEGER DEFAULT NULL,
        battery_level REAL DEFAULT NULL,
        signal_strength INTEGER DEFAULT NULL
    );

    CREATE INDEX IF NOT EXISTS readings_device_timestamp
        ON readings (device_id ASC, timestamp DESC, id DESC);

    CREATE INDEX IF NOT EXISTS readings_timestamp
        ON readings (timestamp);

    PRAGMA user_version = 1;
"#;

/// Bring the database up to the latest schema version
pub fn migrate(conn: &Connection) -> StorageResult<u32> {
    let current: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

    for (index, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        tracing::info!(version = index + 1, "Applying database migration");
        conn.execute_batch(migration)?;
    }

    Ok(MIGRATIONS.len() as u32)
}

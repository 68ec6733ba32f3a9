//! Sensor readings and the SQLite table the sensor board feeds.

use std::path::Path;

use chrono::{Local, NaiveDateTime};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::StoreError;

pub const READINGS_LIMIT: usize = 50;
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    pub timestamp: String,
    pub bme_temp: Option<f64>,
    pub bme_humidity: Option<f64>,
    pub bme_pressure: Option<f64>,
    pub bme_gas: Option<f64>,
    pub scd_co2: Option<i64>,
    pub scd_humidity: Option<f64>,
}

impl SensorReading {
    pub fn timestamp_now() -> String {
        Local::now().format(TIMESTAMP_FORMAT).to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.bme_temp.is_none()
            && self.bme_humidity.is_none()
            && self.bme_pressure.is_none()
            && self.bme_gas.is_none()
            && self.scd_co2.is_none()
            && self.scd_humidity.is_none()
    }

    pub fn temperature(&self) -> Option<f32> {
        self.bme_temp.map(|temp| temp as f32)
    }

    /// Humidity used for control: the SCD sensor first, the BME as backup.
    pub fn humidity(&self) -> Option<f32> {
        self.scd_humidity
            .or(self.bme_humidity)
            .map(|humidity| humidity as f32)
    }

    /// Age of the reading relative to `now`, or `None` when the timestamp
    /// does not parse.
    pub fn age_ms(&self, now: NaiveDateTime) -> Option<u64> {
        let taken = NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()?;
        let age = now.signed_duration_since(taken).num_milliseconds();
        Some(age.max(0) as u64)
    }

    pub fn is_fresh(&self, now: NaiveDateTime, stale_timeout_ms: u64) -> bool {
        self.age_ms(now).is_some_and(|age| age < stale_timeout_ms)
    }
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sensor_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    bme_temp REAL,
    bme_hum REAL,
    bme_press REAL,
    bme_gas REAL,
    scd_co2 INTEGER,
    scd_hum REAL
);";

/// The sensor database. The control side only reads it; the device bridge
/// appends to it.
pub struct SensorStore {
    conn: Connection,
}

impl SensorStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDirectory {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        info!("opening sensor database at {}", path.display());
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Opens a database the writer has already created. Fails when the file
    /// is missing instead of creating an empty one.
    pub fn open_existing<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX
                | OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    pub fn insert(&self, reading: &SensorReading) -> Result<i64, StoreError> {
        self.conn.execute(
            "INSERT INTO sensor_data (
                timestamp, bme_temp, bme_hum, bme_press, bme_gas, scd_co2, scd_hum
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reading.timestamp,
                reading.bme_temp,
                reading.bme_humidity,
                reading.bme_pressure,
                reading.bme_gas,
                reading.scd_co2,
                reading.scd_humidity,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Most recent readings, newest first.
    pub fn latest(&self, limit: usize) -> Result<Vec<SensorReading>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, bme_temp, bme_hum, bme_press, bme_gas, scd_co2, scd_hum
             FROM sensor_data
             ORDER BY id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map([limit as i64], reading_from_row)?;
        let readings = rows.collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    /// Newest reading that carries a temperature.
    pub fn latest_with_temperature(&self) -> Result<Option<SensorReading>, StoreError> {
        let reading = self
            .conn
            .query_row(
                "SELECT timestamp, bme_temp, bme_hum, bme_press, bme_gas, scd_co2, scd_hum
                 FROM sensor_data
                 WHERE bme_temp IS NOT NULL
                 ORDER BY id DESC
                 LIMIT 1",
                [],
                reading_from_row,
            )
            .optional()?;
        Ok(reading)
    }
}

fn reading_from_row(row: &Row<'_>) -> rusqlite::Result<SensorReading> {
    Ok(SensorReading {
        timestamp: row.get(0)?,
        bme_temp: row.get(1)?,
        bme_humidity: row.get(2)?,
        bme_pressure: row.get(3)?,
        bme_gas: row.get(4)?,
        scd_co2: row.get(5)?,
        scd_humidity: row.get(6)?,
    })
}

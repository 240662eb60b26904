//! SQLite-backed raw log and bucket store.
//!
//! Raw rows live in `plane_observations(time, hex_code, flight)` with `time`
//! as Unix epoch seconds. Buckets live in `plane_observations_hourly` keyed by
//! the UTC epoch second of the hour start.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, params};
use tracing::debug;

use super::{BucketStore, HourlyBucket, RawEvent, RawEventSource};
use crate::aggregate::truncate_to_hour;
use crate::error::{MonitorError, Result};

const RAW_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS plane_observations(
    time INTEGER,
    hex_code TEXT,
    flight TEXT
);";

const BUCKET_SCHEMA: &str = "CREATE TABLE IF NOT EXISTS plane_observations_hourly(
    hour INTEGER PRIMARY KEY,
    n_obs INTEGER NOT NULL,
    n_device INTEGER NOT NULL,
    n_flight INTEGER NOT NULL
);";

// `secs` is floor(time) and `hour` floors it to the hour, so pre-1970
// instants land in the hour that contains them. Flight labels are trimmed
// of the same padding as `LABEL_PADDING`.
const HOURLY_ROLLUP: &str = "SELECT
        secs - (((secs % 3600) + 3600) % 3600) AS hour,
        COUNT(*) AS n_obs,
        COUNT(DISTINCT hex_code) AS n_device,
        COUNT(DISTINCT NULLIF(TRIM(flight, ' ' || char(9, 10, 11, 12, 13)), '')) AS n_flight
    FROM (
        SELECT
            CAST(time AS INTEGER) - (time < CAST(time AS INTEGER)) AS secs,
            hex_code,
            flight
        FROM plane_observations
        WHERE time >= ?1 AND time < ?2
    )
    GROUP BY hour
    ORDER BY hour";

fn epoch_to_utc(secs: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0)
}

fn count_from_sql(v: i64) -> u64 {
    u64::try_from(v).unwrap_or(0)
}

fn count_to_sql(v: u64) -> i64 {
    i64::try_from(v).unwrap_or(i64::MAX)
}

/// Converts a raw `time` cell into the hour containing it.
///
/// Only INTEGER and REAL epoch values are accepted; anything else is
/// reported rather than guessed at.
fn raw_time_to_hour(value: Value) -> Result<Option<DateTime<Utc>>> {
    let secs = match value {
        Value::Null => return Ok(None),
        Value::Integer(i) => i,
        Value::Real(f) if f.is_finite() => f.floor() as i64,
        other => {
            return Err(MonitorError::MalformedTimestamp {
                detail: format!("expected epoch seconds, found {other:?}"),
            });
        }
    };
    epoch_to_utc(secs)
        .map(|t| Some(truncate_to_hour(t)))
        .ok_or_else(|| MonitorError::MalformedTimestamp {
            detail: format!("epoch {secs} out of range"),
        })
}

/// Read access to the receiver's raw detection database.
pub struct SqliteRawEvents {
    conn: Connection,
}

impl SqliteRawEvents {
    /// Opens an existing raw database. The schema is owned by the producer
    /// and is not created here.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(MonitorError::raw_unavailable)?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// Creates the raw table if missing. Used when seeding a database.
    pub fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(RAW_SCHEMA)
            .map_err(MonitorError::raw_unavailable)
    }

    /// Inserts detections, e.g. when seeding a database.
    pub fn insert(&self, events: &[RawEvent]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(MonitorError::raw_unavailable)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO plane_observations(time, hex_code, flight)
                    VALUES (?1, ?2, ?3)",
                )
                .map_err(MonitorError::raw_unavailable)?;
            for e in events {
                stmt.execute(params![e.timestamp.timestamp(), e.device_id, e.flight_label])
                    .map_err(MonitorError::raw_unavailable)?;
            }
        }
        tx.commit().map_err(MonitorError::raw_unavailable)?;
        Ok(events.len())
    }

    fn bound(&self, sql: &str) -> Result<Option<DateTime<Utc>>> {
        let value: Value = self
            .conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(MonitorError::raw_unavailable)?;
        raw_time_to_hour(value)
    }

    /// Fails if any raw row carries a non-numeric `time`, since such rows
    /// would otherwise drop out of range filters silently.
    fn check_timestamps(&self) -> Result<()> {
        let (bad, first_rowid): (i64, Option<i64>) = self
            .conn
            .query_row(
                "SELECT COUNT(*), MIN(rowid) FROM plane_observations
                 WHERE typeof(time) NOT IN ('integer', 'real')",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .map_err(MonitorError::raw_unavailable)?;

        if bad > 0 {
            return Err(MonitorError::MalformedTimestamp {
                detail: format!(
                    "{bad} raw rows without an epoch timestamp (first rowid {})",
                    first_rowid.unwrap_or_default()
                ),
            });
        }
        Ok(())
    }
}

impl RawEventSource for SqliteRawEvents {
    fn first_event_hour(&self) -> Result<Option<DateTime<Utc>>> {
        self.check_timestamps()?;
        self.bound("SELECT MIN(time) FROM plane_observations")
    }

    fn last_event_hour(&self) -> Result<Option<DateTime<Utc>>> {
        self.check_timestamps()?;
        self.bound("SELECT MAX(time) FROM plane_observations")
    }

    fn hourly_counts(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HourlyBucket>> {
        self.check_timestamps().map_err(|e| e.with_window(start, end))?;
        debug!(%start, %end, "Querying raw hourly rollup");
        let unavailable =
            |e: rusqlite::Error| MonitorError::raw_unavailable(e).with_window(start, end);

        let mut stmt = self.conn.prepare(HOURLY_ROLLUP).map_err(unavailable)?;
        let rows = stmt
            .query_map(params![start.timestamp(), end.timestamp()], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })
            .map_err(unavailable)?;

        let mut buckets = Vec::new();
        for row in rows {
            let (hour, n_obs, n_device, n_flight) = row.map_err(unavailable)?;
            let hour = epoch_to_utc(hour).ok_or_else(|| MonitorError::MalformedTimestamp {
                detail: format!("hour {hour} out of range"),
            })?;
            buckets.push(HourlyBucket::new(
                hour,
                count_from_sql(n_obs),
                count_from_sql(n_device),
                count_from_sql(n_flight),
            ));
        }
        Ok(buckets)
    }
}

/// Hourly summary database owned by the aggregation engine.
pub struct SqliteBucketStore {
    conn: Connection,
}

impl SqliteBucketStore {
    /// Opens (or creates) the bucket database and ensures its table exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path).map_err(MonitorError::bucket_unavailable)?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.execute_batch(BUCKET_SCHEMA)
            .map_err(MonitorError::bucket_unavailable)?;
        Ok(Self { conn })
    }

    pub fn count(&self) -> Result<usize> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM plane_observations_hourly", [], |row| {
                row.get(0)
            })
            .map_err(MonitorError::bucket_unavailable)?;
        Ok(usize::try_from(n).unwrap_or_default())
    }

    fn hour_bound(&self, sql: &str) -> Result<Option<DateTime<Utc>>> {
        let secs: Option<i64> = self
            .conn
            .query_row(sql, [], |row| row.get(0))
            .map_err(MonitorError::bucket_unavailable)?;
        Ok(secs.and_then(epoch_to_utc))
    }
}

impl BucketStore for SqliteBucketStore {
    fn first_hour(&self) -> Result<Option<DateTime<Utc>>> {
        self.hour_bound("SELECT MIN(hour) FROM plane_observations_hourly")
    }

    fn last_hour(&self) -> Result<Option<DateTime<Utc>>> {
        self.hour_bound("SELECT MAX(hour) FROM plane_observations_hourly")
    }

    fn range(&self, after: DateTime<Utc>, through: DateTime<Utc>) -> Result<Vec<HourlyBucket>> {
        let unavailable =
            |e: rusqlite::Error| MonitorError::bucket_unavailable(e).with_window(after, through);

        let mut stmt = self
            .conn
            .prepare(
                "SELECT hour, n_obs, n_device, n_flight
                FROM plane_observations_hourly
                WHERE hour > ?1 AND hour <= ?2
                ORDER BY hour",
            )
            .map_err(unavailable)?;

        let rows = stmt
            .query_map(params![after.timestamp(), through.timestamp()], |row| {
                let hour: i64 = row.get(0)?;
                let hour = epoch_to_utc(hour)
                    .ok_or(rusqlite::Error::IntegralValueOutOfRange(0, hour))?;
                Ok(HourlyBucket::new(
                    hour,
                    count_from_sql(row.get(1)?),
                    count_from_sql(row.get(2)?),
                    count_from_sql(row.get(3)?),
                ))
            })
            .map_err(unavailable)?;

        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(unavailable)
    }

    /// Writes all buckets in one transaction. A conflicting hour rolls the
    /// whole pass back and surfaces as an integrity violation.
    fn append(&self, buckets: &[HourlyBucket]) -> Result<usize> {
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(MonitorError::bucket_unavailable)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO plane_observations_hourly(hour, n_obs, n_device, n_flight)
                    VALUES (?1, ?2, ?3, ?4)",
                )
                .map_err(MonitorError::bucket_unavailable)?;

            for b in buckets {
                let inserted = stmt.execute(params![
                    b.hour.timestamp(),
                    count_to_sql(b.n_obs),
                    count_to_sql(b.n_device),
                    count_to_sql(b.n_flight),
                ]);
                match inserted {
                    Ok(_) => {}
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == ErrorCode::ConstraintViolation =>
                    {
                        return Err(MonitorError::WatermarkIntegrityViolation { hour: b.hour });
                    }
                    Err(e) => return Err(MonitorError::bucket_unavailable(e)),
                }
            }
        }
        tx.commit().map_err(MonitorError::bucket_unavailable)?;
        Ok(buckets.len())
    }
}

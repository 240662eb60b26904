//! Storage collaborators.
//!
//! [`RawEventSource`] is the append-only detection log the aggregation
//! engine reads from. [`BucketStore`] holds the sparse hourly summaries:
//! only hours that saw at least one event are persisted, gap-filling happens
//! at read time in [`crate::series`].
//!
//! Both traits have a SQLite implementation and an in-memory one.

mod memory;
mod sqlite;

pub use memory::{MemoryBucketStore, MemoryRawEvents};
pub use sqlite::{SqliteBucketStore, SqliteRawEvents};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;

/// One aircraft detection as recorded by the receiver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEvent {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub flight_label: Option<String>,
}

impl RawEvent {
    pub fn new(timestamp: DateTime<Utc>, device_id: &str, flight_label: Option<&str>) -> Self {
        Self {
            timestamp,
            device_id: device_id.to_string(),
            flight_label: flight_label.map(str::to_string),
        }
    }
}

/// Padding stripped from flight labels before they are counted. The SQLite
/// rollup trims the same set: space, `\t`, `\n`, `\x0B`, `\x0C`, `\r`.
pub(crate) const LABEL_PADDING: [char; 6] = [' ', '\t', '\n', '\x0B', '\x0C', '\r'];

/// The label a flight is counted under, `None` when missing or blank.
pub(crate) fn flight_key(label: Option<&str>) -> Option<&str> {
    label
        .map(|l| l.trim_matches(LABEL_PADDING))
        .filter(|l| !l.is_empty())
}

/// Summary counts for one UTC hour `[hour, hour + 1h)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HourlyBucket {
    pub hour: DateTime<Utc>,
    pub n_obs: u64,
    pub n_device: u64,
    pub n_flight: u64,
}

impl HourlyBucket {
    pub fn new(hour: DateTime<Utc>, n_obs: u64, n_device: u64, n_flight: u64) -> Self {
        Self {
            hour,
            n_obs,
            n_device,
            n_flight,
        }
    }

    /// Zero-count bucket used to fill hours with no activity.
    pub fn empty(hour: DateTime<Utc>) -> Self {
        Self::new(hour, 0, 0, 0)
    }
}

/// Read side of the raw detection log.
pub trait RawEventSource {
    /// Hour containing the earliest event, or `None` when the log is empty.
    fn first_event_hour(&self) -> Result<Option<DateTime<Utc>>>;

    /// Hour containing the latest event, or `None` when the log is empty.
    fn last_event_hour(&self) -> Result<Option<DateTime<Utc>>>;

    /// Per-hour rollups of events with `start <= timestamp < end`, ascending
    /// by hour. Hours without events are omitted.
    fn hourly_counts(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HourlyBucket>>;
}

/// Persistent, append-only store of hourly buckets keyed by hour.
pub trait BucketStore {
    fn first_hour(&self) -> Result<Option<DateTime<Utc>>>;

    fn last_hour(&self) -> Result<Option<DateTime<Utc>>>;

    /// Buckets with `after < hour <= through`, ascending by hour.
    fn range(&self, after: DateTime<Utc>, through: DateTime<Utc>) -> Result<Vec<HourlyBucket>>;

    /// Appends `buckets` in the order given and returns how many were written.
    ///
    /// # Errors
    ///
    /// Fails with [`crate::MonitorError::WatermarkIntegrityViolation`] if any
    /// hour is already stored; existing buckets are never overwritten.
    fn append(&self, buckets: &[HourlyBucket]) -> Result<usize>;
}

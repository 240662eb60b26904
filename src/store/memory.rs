use std::collections::{BTreeMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Utc};

use super::{BucketStore, HourlyBucket, RawEvent, RawEventSource, flight_key};
use crate::aggregate::truncate_to_hour;
use crate::error::{MonitorError, Result, StoreKind};

fn poisoned<T>(store: StoreKind) -> impl FnOnce(PoisonError<T>) -> MonitorError {
    move |_| MonitorError::StorageUnavailable {
        store,
        window: None,
        source: "in-memory store lock poisoned".into(),
    }
}

/// Raw detection log held in memory.
#[derive(Debug, Default)]
pub struct MemoryRawEvents {
    events: RwLock<Vec<RawEvent>>,
}

impl MemoryRawEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_events(events: Vec<RawEvent>) -> Self {
        Self {
            events: RwLock::new(events),
        }
    }

    /// Appends events to the log.
    pub fn extend(&self, events: impl IntoIterator<Item = RawEvent>) -> Result<()> {
        self.events
            .write()
            .map_err(poisoned(StoreKind::Raw))?
            .extend(events);
        Ok(())
    }
}

impl RawEventSource for MemoryRawEvents {
    fn first_event_hour(&self) -> Result<Option<DateTime<Utc>>> {
        let events = self.events.read().map_err(poisoned(StoreKind::Raw))?;
        Ok(events.iter().map(|e| e.timestamp).min().map(truncate_to_hour))
    }

    fn last_event_hour(&self) -> Result<Option<DateTime<Utc>>> {
        let events = self.events.read().map_err(poisoned(StoreKind::Raw))?;
        Ok(events.iter().map(|e| e.timestamp).max().map(truncate_to_hour))
    }

    fn hourly_counts(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Vec<HourlyBucket>> {
        let events = self.events.read().map_err(poisoned(StoreKind::Raw))?;

        let mut hours: BTreeMap<DateTime<Utc>, (u64, HashSet<&str>, HashSet<&str>)> =
            BTreeMap::new();

        for e in events.iter().filter(|e| e.timestamp >= start && e.timestamp < end) {
            let (n_obs, devices, flights) = hours.entry(truncate_to_hour(e.timestamp)).or_default();
            *n_obs += 1;
            devices.insert(e.device_id.as_str());
            if let Some(label) = flight_key(e.flight_label.as_deref()) {
                flights.insert(label);
            }
        }

        Ok(hours
            .into_iter()
            .map(|(hour, (n_obs, devices, flights))| {
                HourlyBucket::new(hour, n_obs, devices.len() as u64, flights.len() as u64)
            })
            .collect())
    }
}

/// Bucket store held in memory. Appends are applied one at a time, so a
/// conflicting hour stops the pass after the buckets before it were written.
#[derive(Debug, Default)]
pub struct MemoryBucketStore {
    buckets: RwLock<BTreeMap<DateTime<Utc>, HourlyBucket>>,
}

impl MemoryBucketStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self
            .buckets
            .read()
            .map_err(poisoned(StoreKind::Bucket))?
            .len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    pub fn get(&self, hour: DateTime<Utc>) -> Result<Option<HourlyBucket>> {
        Ok(self
            .buckets
            .read()
            .map_err(poisoned(StoreKind::Bucket))?
            .get(&hour)
            .copied())
    }
}

impl BucketStore for MemoryBucketStore {
    fn first_hour(&self) -> Result<Option<DateTime<Utc>>> {
        let buckets = self.buckets.read().map_err(poisoned(StoreKind::Bucket))?;
        Ok(buckets.keys().next().copied())
    }

    fn last_hour(&self) -> Result<Option<DateTime<Utc>>> {
        let buckets = self.buckets.read().map_err(poisoned(StoreKind::Bucket))?;
        Ok(buckets.keys().next_back().copied())
    }

    fn range(&self, after: DateTime<Utc>, through: DateTime<Utc>) -> Result<Vec<HourlyBucket>> {
        let buckets = self.buckets.read().map_err(poisoned(StoreKind::Bucket))?;
        if after >= through {
            return Ok(Vec::new());
        }
        Ok(buckets
            .range(after..=through)
            .filter(|(hour, _)| **hour > after)
            .map(|(_, b)| *b)
            .collect())
    }

    fn append(&self, new: &[HourlyBucket]) -> Result<usize> {
        let mut buckets = self.buckets.write().map_err(poisoned(StoreKind::Bucket))?;
        for bucket in new {
            if buckets.contains_key(&bucket.hour) {
                return Err(MonitorError::WatermarkIntegrityViolation { hour: bucket.hour });
            }
            buckets.insert(bucket.hour, *bucket);
        }
        Ok(new.len())
    }
}

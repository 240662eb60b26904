use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::watermark::{next_start, safe_cutoff};
use crate::error::{MonitorError, Result};
use crate::store::{BucketStore, HourlyBucket, RawEventSource};

/// Outcome of one catch-up pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpdateReport {
    /// First hour considered, `None` if there was nothing to aggregate from.
    pub start: Option<DateTime<Utc>>,
    /// Exclusive cutoff used for this pass.
    pub end: DateTime<Utc>,
    pub hours_written: usize,
}

impl UpdateReport {
    fn noop(start: Option<DateTime<Utc>>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            hours_written: 0,
        }
    }
}

/// Rolls completed hours of the raw log into the bucket store.
///
/// Only one engine may write to a given bucket store at a time; a second
/// concurrent writer will hit a
/// [`MonitorError::WatermarkIntegrityViolation`] instead of double counting.
pub struct AggregationEngine<R, B> {
    raw: R,
    buckets: B,
}

impl<R: RawEventSource, B: BucketStore> AggregationEngine<R, B> {
    pub fn new(raw: R, buckets: B) -> Self {
        Self { raw, buckets }
    }

    pub fn raw(&self) -> &R {
        &self.raw
    }

    pub fn buckets(&self) -> &B {
        &self.buckets
    }

    /// Aggregates every hour that completed since the last pass.
    pub fn incremental_update(&self) -> Result<UpdateReport> {
        self.incremental_update_at(Utc::now())
    }

    /// Same as [`Self::incremental_update`] with an explicit clock reading.
    #[tracing::instrument(skip(self))]
    pub fn incremental_update_at(&self, now: DateTime<Utc>) -> Result<UpdateReport> {
        let end = safe_cutoff(now);

        let start = match next_start(&self.buckets)? {
            Some(start) => start,
            None => match self.raw.first_event_hour()? {
                Some(first) => {
                    info!(%first, "Bucket store empty, backfilling from first raw hour");
                    first
                }
                None => {
                    debug!("No raw events yet");
                    return Ok(UpdateReport::noop(None, end));
                }
            },
        };

        if start >= end {
            debug!(%start, %end, "No completed hour to aggregate");
            return Ok(UpdateReport::noop(Some(start), end));
        }

        info!(%start, %end, "Aggregating completed hours");
        let mut rows = self.raw.hourly_counts(start, end)?;
        rows.sort_by_key(|b| b.hour);
        check_pass(&rows, start, end)?;

        let hours_written = self.buckets.append(&rows)?;
        info!(hours_written, "Hourly buckets appended");

        Ok(UpdateReport {
            start: Some(start),
            end,
            hours_written,
        })
    }
}

/// A pass may only append distinct hours inside `[start, end)`, ascending.
fn check_pass(rows: &[HourlyBucket], start: DateTime<Utc>, end: DateTime<Utc>) -> Result<()> {
    if let Some(stray) = rows.iter().find(|b| b.hour < start || b.hour >= end) {
        return Err(MonitorError::WatermarkIntegrityViolation { hour: stray.hour });
    }
    if let Some(pair) = rows.windows(2).find(|w| w[0].hour == w[1].hour) {
        return Err(MonitorError::WatermarkIntegrityViolation { hour: pair[1].hour });
    }
    Ok(())
}

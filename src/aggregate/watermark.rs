use chrono::{DateTime, TimeDelta, Utc};

use crate::error::Result;
use crate::store::BucketStore;

const SECONDS_PER_HOUR: i64 = 3600;

/// Floors an instant to the start of its UTC hour.
pub fn truncate_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let excess = t.timestamp().rem_euclid(SECONDS_PER_HOUR);
    t - TimeDelta::seconds(excess) - TimeDelta::nanoseconds(i64::from(t.timestamp_subsec_nanos()))
}

/// First hour not yet aggregated: the watermark plus one hour, or `None`
/// when the store is empty and aggregation should start from raw history.
///
/// Always read from the store; never cached.
pub fn next_start<B: BucketStore + ?Sized>(store: &B) -> Result<Option<DateTime<Utc>>> {
    Ok(store.last_hour()?.map(|hour| hour + TimeDelta::hours(1)))
}

/// Exclusive upper bound for aggregation: the start of the hour containing
/// `now`. That hour may still receive raw writes.
pub fn safe_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_hour(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HourlyBucket, MemoryBucketStore};
    use chrono::TimeZone;

    #[test]
    fn test_truncate_drops_minutes_seconds_and_nanos() {
        let t =
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 59, 59).unwrap() + TimeDelta::milliseconds(999);
        assert_eq!(
            truncate_to_hour(t),
            Utc.with_ymd_and_hms(2024, 1, 31, 23, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_truncate_is_identity_on_hour_boundary() {
        let t = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(truncate_to_hour(t), t);
    }

    #[test]
    fn test_safe_cutoff_excludes_current_hour() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 1).unwrap();
        assert_eq!(safe_cutoff(now), Utc.with_ymd_and_hms(2024, 6, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn test_next_start_empty_store() {
        let store = MemoryBucketStore::new();
        assert_eq!(next_start(&store).unwrap(), None);
    }

    #[test]
    fn test_next_start_follows_last_bucket() {
        let store = MemoryBucketStore::new();
        let hour = Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap();
        store.append(&[HourlyBucket::new(hour, 1, 1, 1)]).unwrap();

        assert_eq!(next_start(&store).unwrap(), Some(hour + TimeDelta::hours(1)));
    }
}

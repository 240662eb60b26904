use airplane_monitor::MonitorError;
use airplane_monitor::aggregate::AggregationEngine;
use airplane_monitor::decompose::decompose;
use airplane_monitor::series::{Metric, materialize};
use airplane_monitor::store::{
    BucketStore, HourlyBucket, MemoryBucketStore, MemoryRawEvents, RawEvent, SqliteBucketStore,
    SqliteRawEvents,
};
use chrono::{DateTime, TimeDelta, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use tempfile::TempDir;

fn at(d: u32, h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 4, d, h, m, 0).unwrap()
}

fn sqlite_engine(dir: &TempDir) -> AggregationEngine<SqliteRawEvents, SqliteBucketStore> {
    let raw = SqliteRawEvents::open(dir.path().join("raw.db")).unwrap();
    raw.init_schema().unwrap();
    let buckets = SqliteBucketStore::open(dir.path().join("hourly.db")).unwrap();
    AggregationEngine::new(raw, buckets)
}

fn scenario_events() -> Vec<RawEvent> {
    vec![
        RawEvent::new(at(1, 8, 0), "abc123", Some("SWA42")),
        RawEvent::new(at(1, 8, 25), "abc123", Some("SWA42")),
        RawEvent::new(at(1, 8, 59), "def456", None),
        RawEvent::new(at(1, 10, 30), "abc123", Some("SWA42")),
    ]
}

#[test]
fn test_scenario_sparse_buckets_then_gap_fill() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sqlite_engine(&dir);
    engine.raw().insert(&scenario_events()).unwrap();

    let report = engine.incremental_update_at(at(1, 11, 0)).unwrap();

    assert_eq!(report.hours_written, 2);
    assert_eq!(
        engine.buckets().range(at(1, 0, 0), at(1, 23, 0)).unwrap(),
        vec![
            HourlyBucket::new(at(1, 8, 0), 3, 2, 1),
            HourlyBucket::new(at(1, 10, 0), 1, 1, 1),
        ]
    );

    let series = materialize(engine.buckets(), at(1, 8, 0), at(1, 10, 0), Tz::UTC).unwrap();
    let rows: Vec<_> = series
        .points()
        .iter()
        .map(|p| (p.hour.hour(), p.n_obs, p.n_device, p.n_flight))
        .collect();
    assert_eq!(rows, vec![(8, 3, 2, 1), (9, 0, 0, 0), (10, 1, 1, 1)]);
}

#[test]
fn test_repeated_update_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sqlite_engine(&dir);
    engine.raw().insert(&scenario_events()).unwrap();

    engine.incremental_update_at(at(1, 11, 0)).unwrap();
    let before = engine.buckets().count().unwrap();
    let second = engine.incremental_update_at(at(1, 11, 40)).unwrap();

    assert_eq!(second.hours_written, 0);
    assert_eq!(engine.buckets().count().unwrap(), before);
}

#[test]
fn test_hour_containing_now_is_never_aggregated() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sqlite_engine(&dir);
    engine.raw().insert(&scenario_events()).unwrap();

    let now = at(1, 10, 45);
    engine.incremental_update_at(now).unwrap();

    assert_eq!(engine.buckets().last_hour().unwrap(), Some(at(1, 8, 0)));
    assert!(
        engine
            .buckets()
            .range(at(1, 9, 0), at(1, 10, 0))
            .unwrap()
            .is_empty()
    );
}

#[test]
fn test_engine_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let engine = sqlite_engine(&dir);
        engine.raw().insert(&scenario_events()).unwrap();
        engine.incremental_update_at(at(1, 9, 0)).unwrap();
    }

    let engine = sqlite_engine(&dir);
    let report = engine.incremental_update_at(at(1, 11, 0)).unwrap();

    assert_eq!(report.start, Some(at(1, 9, 0)));
    assert_eq!(report.hours_written, 1);
    assert_eq!(engine.buckets().count().unwrap(), 2);
}

#[test]
fn test_duplicate_append_is_integrity_violation() {
    let dir = tempfile::tempdir().unwrap();
    let engine = sqlite_engine(&dir);
    engine.raw().insert(&scenario_events()).unwrap();
    engine.incremental_update_at(at(1, 11, 0)).unwrap();

    let err = engine
        .buckets()
        .append(&[HourlyBucket::new(at(1, 8, 0), 99, 99, 99)])
        .unwrap_err();

    assert!(matches!(
        err,
        MonitorError::WatermarkIntegrityViolation { hour } if hour == at(1, 8, 0)
    ));
    assert_eq!(
        engine.buckets().range(at(1, 7, 0), at(1, 8, 0)).unwrap(),
        vec![HourlyBucket::new(at(1, 8, 0), 3, 2, 1)]
    );
}

#[test]
fn test_materialize_has_one_row_per_hour_for_any_window() {
    let store = MemoryBucketStore::new();
    store
        .append(&[
            HourlyBucket::new(at(2, 3, 0), 5, 3, 2),
            HourlyBucket::new(at(2, 17, 0), 1, 1, 0),
            HourlyBucket::new(at(3, 6, 0), 2, 2, 2),
        ])
        .unwrap();
    let stored = [at(2, 3, 0), at(2, 17, 0), at(3, 6, 0)];

    for (start_h, len) in [(0u32, 1i64), (3, 0), (2, 30), (10, 48), (17, 13)] {
        let start = at(2, start_h, 0);
        let end = start + TimeDelta::hours(len);

        let series = materialize(&store, start, end, Tz::UTC).unwrap();

        assert_eq!(series.len() as i64, len + 1);
        for (i, p) in series.points().iter().enumerate() {
            assert_eq!(p.utc_hour(), start + TimeDelta::hours(i as i64));
            if !stored.contains(&p.utc_hour()) {
                assert_eq!((p.n_obs, p.n_device, p.n_flight), (0, 0, 0));
            }
        }
    }
}

#[test]
fn test_timezone_round_trip_recovers_utc_hours() {
    let store = MemoryBucketStore::new();
    store
        .append(&[HourlyBucket::new(at(5, 12, 0), 1, 1, 1)])
        .unwrap();
    let utc = materialize(&store, at(5, 0, 0), at(8, 0, 0), Tz::UTC).unwrap();

    for tz in [
        chrono_tz::America::New_York,
        chrono_tz::Asia::Kolkata,
        chrono_tz::Australia::Lord_Howe,
    ] {
        let local = utc.with_timezone(tz);
        let back = local.with_timezone(Tz::UTC);

        assert_eq!(back, utc);
        assert_eq!(
            materialize(&store, at(5, 0, 0), at(8, 0, 0), tz).unwrap(),
            local
        );
    }
}

/// Three weeks of synthetic traffic: busier by day, quieter at weekends.
fn synthetic_traffic(start: DateTime<Utc>, hours: i64) -> Vec<RawEvent> {
    let mut events = Vec::new();
    for h in 0..hours {
        let hour = start + TimeDelta::hours(h);
        let hour_of_day = (h % 24) as usize;
        let weekend = matches!((h / 24) % 7, 5 | 6);
        let flights = [1, 0, 0, 0, 0, 1, 2, 4, 6, 6, 5, 5, 5, 5, 6, 6, 7, 7, 6, 5, 4, 3, 2, 1]
            [hour_of_day]
            + if weekend { 0 } else { 2 };
        for f in 0..flights {
            let ts = hour + TimeDelta::minutes(f as i64 * 5);
            let device = format!("{:06x}", f);
            let flight = format!("FLT{f}");
            events.push(RawEvent::new(ts, &device, Some(&flight)));
            events.push(RawEvent::new(ts + TimeDelta::seconds(30), &device, Some(&flight)));
        }
    }
    events
}

#[test]
fn test_full_pipeline_decomposition_is_additive() {
    // 2024-04-01 is a Monday.
    let start = at(1, 0, 0);
    let hours = 24 * 21;
    let engine = AggregationEngine::new(
        MemoryRawEvents::from_events(synthetic_traffic(start, hours)),
        MemoryBucketStore::new(),
    );

    let now = start + TimeDelta::hours(hours) + TimeDelta::minutes(10);
    let report = engine.incremental_update_at(now).unwrap();
    assert_eq!(report.end, start + TimeDelta::hours(hours));

    let series = materialize(
        engine.buckets(),
        start,
        start + TimeDelta::hours(hours - 1),
        Tz::UTC,
    )
    .unwrap();
    assert_eq!(series.len() as i64, hours);

    let result = decompose(&series, Metric::NFlight).unwrap();
    assert_eq!(result.len(), series.len());
    for p in result.points() {
        let tol = 1e-6 * p.observed.abs().max(1.0);
        assert!((p.reconstructed() - p.observed).abs() <= tol);
    }

    let daily = result.daily_shape(now);
    assert!(daily.mean_by_hour[16] > daily.mean_by_hour[3]);

    let weekly = result.weekly_shape(now);
    let weekday = weekly.mean_by_weekday[2].offset;
    let sunday = weekly.mean_by_weekday[6].offset;
    assert!(weekday > sunday, "weekday {weekday} vs sunday {sunday}");
}

#[test]
fn test_decompose_rejects_short_window() {
    let store = MemoryBucketStore::new();
    let series = materialize(&store, at(1, 0, 0), at(14, 22, 0), Tz::UTC).unwrap();
    assert_eq!(series.len(), 24 * 13 + 23);

    let err = decompose(&series, Metric::NObs).unwrap_err();
    assert!(matches!(err, MonitorError::InsufficientData { .. }));
}

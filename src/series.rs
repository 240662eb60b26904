//! Range materialization: reads sparse hourly buckets and produces a dense,
//! timezone-labelled series with exactly one row per hour.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::truncate_to_hour;
use crate::error::{MonitorError, Result};
use crate::store::{BucketStore, HourlyBucket};

/// Count column a series can be analysed on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    NObs,
    NDevice,
    #[default]
    NFlight,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::NObs => "n_obs",
            Metric::NDevice => "n_device",
            Metric::NFlight => "n_flight",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "n_obs" => Ok(Metric::NObs),
            "n_device" | "n_hex" => Ok(Metric::NDevice),
            "n_flight" => Ok(Metric::NFlight),
            other => Err(format!(
                "unknown metric '{other}', expected n_obs, n_device or n_flight"
            )),
        }
    }
}

/// One hour of a materialized series. `hour` identifies the UTC hour and
/// carries the display timezone as its label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesPoint {
    pub hour: DateTime<Tz>,
    pub n_obs: u64,
    pub n_device: u64,
    pub n_flight: u64,
}

impl SeriesPoint {
    fn from_bucket(bucket: HourlyBucket, tz: Tz) -> Self {
        Self {
            hour: bucket.hour.with_timezone(&tz),
            n_obs: bucket.n_obs,
            n_device: bucket.n_device,
            n_flight: bucket.n_flight,
        }
    }

    pub fn utc_hour(&self) -> DateTime<Utc> {
        self.hour.with_timezone(&Utc)
    }

    pub fn value(&self, metric: Metric) -> f64 {
        let v = match metric {
            Metric::NObs => self.n_obs,
            Metric::NDevice => self.n_device,
            Metric::NFlight => self.n_flight,
        };
        v as f64
    }
}

/// Dense hourly series, ascending, one row per hour.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializedSeries {
    timezone: Tz,
    points: Vec<SeriesPoint>,
}

impl MaterializedSeries {
    /// Wraps already-dense points, checking the one-row-per-hour invariant.
    pub fn from_points(timezone: Tz, points: Vec<SeriesPoint>) -> Result<Self> {
        let series = Self {
            timezone,
            points: points
                .into_iter()
                .map(|p| SeriesPoint {
                    hour: p.hour.with_timezone(&timezone),
                    ..p
                })
                .collect(),
        };
        series.ensure_complete()?;
        Ok(series)
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn points(&self) -> &[SeriesPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn values(&self, metric: Metric) -> Vec<f64> {
        self.points.iter().map(|p| p.value(metric)).collect()
    }

    /// Relabels every hour in another timezone. The UTC instants are
    /// unchanged.
    pub fn with_timezone(&self, tz: Tz) -> Self {
        Self {
            timezone: tz,
            points: self
                .points
                .iter()
                .map(|p| SeriesPoint {
                    hour: p.hour.with_timezone(&tz),
                    ..*p
                })
                .collect(),
        }
    }

    /// Verifies consecutive rows are exactly one hour apart and hour-aligned.
    pub fn ensure_complete(&self) -> Result<()> {
        if let Some(first) = self.points.first() {
            let utc = first.utc_hour();
            if truncate_to_hour(utc) != utc {
                return Err(MonitorError::IncompleteSeries {
                    expected: "hour-aligned rows".to_string(),
                    found: utc.to_rfc3339(),
                });
            }
        }
        for pair in self.points.windows(2) {
            let (prev, next) = (pair[0].utc_hour(), pair[1].utc_hour());
            let expected = prev + TimeDelta::hours(1);
            if next != expected {
                return Err(MonitorError::IncompleteSeries {
                    expected: expected.to_rfc3339(),
                    found: next.to_rfc3339(),
                });
            }
        }
        Ok(())
    }
}

/// Start of local calendar day `date` in `tz`, as a UTC instant. When
/// midnight falls in a DST gap the first instant of the day is used.
pub fn local_midnight(date: NaiveDate, tz: Tz) -> Option<DateTime<Utc>> {
    (0..24).find_map(|h| {
        let local = date.and_hms_opt(h, 0, 0)?;
        tz.from_local_datetime(&local)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    })
}

/// Builds the dense series for every hour in `[start, end]`.
///
/// Both bounds are floored to their hour. Hours without a stored bucket get
/// zero counts. Labels are converted from UTC to `tz` exactly once here.
/// An inverted window yields an empty series.
#[tracing::instrument(skip(store))]
pub fn materialize<B: BucketStore + ?Sized>(
    store: &B,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    tz: Tz,
) -> Result<MaterializedSeries> {
    let first = truncate_to_hour(start);
    let last = truncate_to_hour(end);

    if first > last {
        return Ok(MaterializedSeries {
            timezone: tz,
            points: Vec::new(),
        });
    }

    // The store range is exclusive at the bottom, so step back one hour to
    // include the first requested hour.
    let stored: HashMap<DateTime<Utc>, HourlyBucket> = store
        .range(first - TimeDelta::hours(1), last)?
        .into_iter()
        .map(|b| (b.hour, b))
        .collect();

    let mut points = Vec::new();
    let mut hour = first;
    while hour <= last {
        let bucket = stored
            .get(&hour)
            .copied()
            .unwrap_or_else(|| HourlyBucket::empty(hour));
        points.push(SeriesPoint::from_bucket(bucket, tz));
        hour += TimeDelta::hours(1);
    }

    debug!(
        rows = points.len(),
        stored = stored.len(),
        "Materialized hourly series"
    );

    let series = MaterializedSeries {
        timezone: tz,
        points,
    };
    series.ensure_complete()?;
    Ok(series)
}

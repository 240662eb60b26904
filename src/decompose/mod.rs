//! Seasonal-trend decomposition of a materialized hourly series.
//!
//! The statistical method sits behind [`SeasonalDecomposer`]; [`decompose`]
//! uses [`Mstl`] with daily and weekly periods. Results are recomputed on
//! every call and shape summaries ([`DailyShape`], [`WeeklyShape`]) are
//! derived from them on demand.

mod mstl;
mod shape;
mod stl;

pub use mstl::Mstl;
pub use shape::{DailyShape, HourOffset, WeekdayOffset, WeeklyShape};
pub use stl::{Stl, StlFit};

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::info;

use crate::error::{MonitorError, Result};
use crate::series::{MaterializedSeries, Metric};

/// One day, in hours.
pub const DAILY_PERIOD: usize = 24;
/// One week, in hours.
pub const WEEKLY_PERIOD: usize = 24 * 7;

/// Additive components of a series: `values[i] = trend[i] +
/// Σ seasonal[k][i] + residual[i]`. `seasonal` follows the order of the
/// requested periods.
#[derive(Debug, Clone, PartialEq)]
pub struct Components {
    pub trend: Vec<f64>,
    pub seasonal: Vec<Vec<f64>>,
    pub residual: Vec<f64>,
}

/// A multi-period additive decomposition method.
pub trait SeasonalDecomposer {
    fn decompose(&self, values: &[f64], periods: &[usize]) -> Result<Components>;
}

/// Components for one hour of the input series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecomposedPoint {
    pub hour: DateTime<Tz>,
    pub observed: f64,
    pub trend: f64,
    pub seasonal_daily: f64,
    pub seasonal_weekly: f64,
    pub residual: f64,
}

impl DecomposedPoint {
    pub fn utc_hour(&self) -> DateTime<Utc> {
        self.hour.with_timezone(&Utc)
    }

    /// `trend + seasonal_daily + seasonal_weekly + residual`.
    pub fn reconstructed(&self) -> f64 {
        self.trend + self.seasonal_daily + self.seasonal_weekly + self.residual
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecompositionResult {
    metric: Metric,
    timezone: Tz,
    points: Vec<DecomposedPoint>,
}

impl DecompositionResult {
    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    pub fn points(&self) -> &[DecomposedPoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Decomposes `metric` of `series` into trend, daily and weekly seasonality
/// and residual using the default [`Mstl`].
pub fn decompose(series: &MaterializedSeries, metric: Metric) -> Result<DecompositionResult> {
    decompose_with(&Mstl::default(), series, metric)
}

/// Same as [`decompose`] with a caller-chosen method.
///
/// # Errors
///
/// [`MonitorError::IncompleteSeries`] if the series has gaps,
/// [`MonitorError::InsufficientData`] if it is shorter than two weeks.
#[tracing::instrument(skip(decomposer, series), fields(rows = series.len()))]
pub fn decompose_with<D: SeasonalDecomposer + ?Sized>(
    decomposer: &D,
    series: &MaterializedSeries,
    metric: Metric,
) -> Result<DecompositionResult> {
    series.ensure_complete()?;

    let required = 2 * WEEKLY_PERIOD;
    if series.len() < required {
        return Err(MonitorError::InsufficientData {
            len: series.len(),
            required,
        });
    }

    let values = series.values(metric);
    let components = decomposer.decompose(&values, &[DAILY_PERIOD, WEEKLY_PERIOD])?;

    let n = values.len();
    let shapes_ok = components.trend.len() == n
        && components.residual.len() == n
        && components.seasonal.len() == 2
        && components.seasonal.iter().all(|s| s.len() == n);
    if !shapes_ok {
        return Err(MonitorError::IncompleteSeries {
            expected: format!("{n} values per component"),
            found: format!(
                "trend {}, residual {}, {} seasonal components",
                components.trend.len(),
                components.residual.len(),
                components.seasonal.len()
            ),
        });
    }

    let points = series
        .points()
        .iter()
        .enumerate()
        .map(|(i, p)| DecomposedPoint {
            hour: p.hour,
            observed: values[i],
            trend: components.trend[i],
            seasonal_daily: components.seasonal[0][i],
            seasonal_weekly: components.seasonal[1][i],
            residual: components.residual[i],
        })
        .collect();

    info!(%metric, rows = n, "Series decomposed");

    Ok(DecompositionResult {
        metric,
        timezone: series.timezone(),
        points,
    })
}

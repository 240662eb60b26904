//! Canonical daily and weekly shapes derived from a decomposition, plus the
//! "today" / "this week" overlays. Everything is computed in the result's
//! timezone from the reference instant passed in.

use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Days, NaiveDate, Timelike, Utc};
use serde::Serialize;

use super::DecompositionResult;

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Arithmetic mean. Returns 0.0 for empty input.
fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a pre-computed mean. Returns 0.0 for
/// empty input.
fn stddev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourOffset {
    pub hour_of_day: u32,
    pub offset: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeekdayOffset {
    /// Monday = 0 … Sunday = 6.
    pub weekday: u32,
    pub name: String,
    pub offset: f64,
}

impl WeekdayOffset {
    fn new(weekday: u32, offset: f64) -> Self {
        Self {
            weekday,
            name: WEEKDAY_NAMES[weekday as usize % 7].to_string(),
            offset,
        }
    }
}

/// Intraday curve of the daily seasonal component.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyShape {
    /// Mean offset per local hour of day, index 0..24.
    pub mean_by_hour: Vec<f64>,
    /// Spread of the offsets behind each mean.
    pub stddev_by_hour: Vec<f64>,
    /// Hours of the current local day, in order.
    pub today: Vec<HourOffset>,
}

/// Weekday curve of the weekly seasonal component, one value per day.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeeklyShape {
    /// Mean daily offset per weekday, Monday first.
    pub mean_by_weekday: Vec<WeekdayOffset>,
    /// Days since the most recent local Monday, in order.
    pub this_week: Vec<WeekdayOffset>,
}

impl DecompositionResult {
    fn local_today(&self, now: DateTime<Utc>) -> NaiveDate {
        now.with_timezone(&self.timezone).date_naive()
    }

    /// Averages `seasonal_daily` by local hour of day.
    pub fn daily_shape(&self, now: DateTime<Utc>) -> DailyShape {
        let mut by_hour: Vec<Vec<f64>> = vec![Vec::new(); 24];
        for p in &self.points {
            by_hour[p.hour.hour() as usize].push(p.seasonal_daily);
        }

        let mean_by_hour: Vec<f64> = by_hour.iter().map(|v| mean(v)).collect();
        let stddev_by_hour = by_hour
            .iter()
            .zip(&mean_by_hour)
            .map(|(v, m)| stddev(v, *m))
            .collect();

        let today = self.local_today(now);
        let today = self
            .points
            .iter()
            .filter(|p| p.hour.date_naive() == today)
            .map(|p| HourOffset {
                hour_of_day: p.hour.hour(),
                offset: p.seasonal_daily,
            })
            .collect();

        DailyShape {
            mean_by_hour,
            stddev_by_hour,
            today,
        }
    }

    /// Resamples `seasonal_weekly` to one mean per local calendar day, then
    /// averages those by weekday. Days cut by the window edges or by DST
    /// transitions average the hours they have.
    pub fn weekly_shape(&self, now: DateTime<Utc>) -> WeeklyShape {
        let mut days: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
        for p in &self.points {
            days.entry(p.hour.date_naive())
                .or_default()
                .push(p.seasonal_weekly);
        }
        let daily: Vec<(NaiveDate, f64)> = days.iter().map(|(d, v)| (*d, mean(v))).collect();

        let mut by_weekday: Vec<Vec<f64>> = vec![Vec::new(); 7];
        for (date, offset) in &daily {
            by_weekday[date.weekday().num_days_from_monday() as usize].push(*offset);
        }
        let mean_by_weekday = by_weekday
            .iter()
            .enumerate()
            .map(|(i, v)| WeekdayOffset::new(i as u32, mean(v)))
            .collect();

        let today = self.local_today(now);
        let monday = today
            .checked_sub_days(Days::new(u64::from(today.weekday().num_days_from_monday())))
            .unwrap_or(today);
        let this_week = daily
            .iter()
            .filter(|(date, _)| *date >= monday)
            .map(|(date, offset)| {
                WeekdayOffset::new(date.weekday().num_days_from_monday(), *offset)
            })
            .collect();

        WeeklyShape {
            mean_by_weekday,
            this_week,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decompose::{Components, SeasonalDecomposer, decompose_with};
    use crate::error::Result;
    use crate::series::{MaterializedSeries, Metric, SeriesPoint};
    use chrono::{TimeDelta, TimeZone};
    use chrono_tz::Tz;

    /// Puts the hour of day in the daily component and the weekday in the
    /// weekly one, so shapes are easy to predict.
    struct Calendar {
        start: DateTime<Utc>,
        tz: Tz,
    }

    impl SeasonalDecomposer for Calendar {
        fn decompose(&self, values: &[f64], _periods: &[usize]) -> Result<Components> {
            let n = values.len();
            let local =
                |i: usize| (self.start + TimeDelta::hours(i as i64)).with_timezone(&self.tz);
            let daily: Vec<f64> = (0..n).map(|i| local(i).hour() as f64).collect();
            let weekly: Vec<f64> = (0..n)
                .map(|i| local(i).weekday().num_days_from_monday() as f64 * 10.0)
                .collect();
            let residual = (0..n).map(|i| values[i] - daily[i] - weekly[i]).collect();
            Ok(Components {
                trend: vec![0.0; n],
                seasonal: vec![daily, weekly],
                residual,
            })
        }
    }

    fn result(start: DateTime<Utc>, hours: usize, tz: Tz) -> DecompositionResult {
        let points = (0..hours)
            .map(|i| SeriesPoint {
                hour: (start + TimeDelta::hours(i as i64)).with_timezone(&tz),
                n_obs: 1,
                n_device: 1,
                n_flight: 1,
            })
            .collect();
        let series = MaterializedSeries::from_points(tz, points).unwrap();
        decompose_with(&Calendar { start, tz }, &series, Metric::NFlight).unwrap()
    }

    #[test]
    fn test_daily_shape_by_local_hour() {
        // Monday 2024-01-01 00:00 UTC, three weeks.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let r = result(start, 24 * 21, Tz::UTC);
        let now = start + TimeDelta::hours(24 * 20 + 5);

        let shape = r.daily_shape(now);

        assert_eq!(shape.mean_by_hour.len(), 24);
        assert_eq!(shape.mean_by_hour[7], 7.0);
        assert!(shape.stddev_by_hour.iter().all(|s| *s == 0.0));
        assert_eq!(shape.today.len(), 24);
        assert_eq!(shape.today[0].hour_of_day, 0);
    }

    #[test]
    fn test_today_overlay_uses_local_midnight() {
        let tz = chrono_tz::America::New_York;
        // 2024-01-01 05:00 UTC is local midnight in New York.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 5, 0, 0).unwrap();
        let r = result(start, 24 * 14 + 3, tz);
        // 02:30 local on the last day.
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 7, 30, 0).unwrap();

        let shape = r.daily_shape(now);

        let hours: Vec<u32> = shape.today.iter().map(|h| h.hour_of_day).collect();
        assert_eq!(hours, vec![0, 1, 2]);
    }

    #[test]
    fn test_weekly_shape_ordered_monday_first() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let r = result(start, 24 * 21, Tz::UTC);
        // Thursday of the third week.
        let now = Utc.with_ymd_and_hms(2024, 1, 18, 12, 0, 0).unwrap();

        let shape = r.weekly_shape(now);

        let means: Vec<f64> = shape.mean_by_weekday.iter().map(|d| d.offset).collect();
        assert_eq!(means, vec![0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0]);
        assert_eq!(shape.mean_by_weekday[0].name, "Monday");
        assert_eq!(shape.mean_by_weekday[6].name, "Sunday");

        // Monday 15th through Sunday 21st are all in the window.
        let week: Vec<u32> = shape.this_week.iter().map(|d| d.weekday).collect();
        assert_eq!(week, vec![0, 1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_stats_helpers_handle_empty_input() {
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(stddev(&[], 0.0), 0.0);
        assert_eq!(stddev(&[1.0, 3.0], 2.0), 1.0);
    }
}

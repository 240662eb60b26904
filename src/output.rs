//! Output formatting and persistence for series and decompositions.
//!
//! Supports JSON logging and CSV export. Hours are written as RFC 3339 in
//! the series' display timezone, with the UTC instant alongside.

use std::fs::File;
use std::path::Path;

use anyhow::Result;
use csv::WriterBuilder;
use serde::Serialize;
use tracing::{debug, info};

use crate::decompose::DecompositionResult;
use crate::series::MaterializedSeries;

#[derive(Debug, Serialize)]
pub struct SeriesRecord {
    pub hour: String,
    pub hour_utc: String,
    pub n_obs: u64,
    pub n_device: u64,
    pub n_flight: u64,
}

#[derive(Debug, Serialize)]
pub struct DecompositionRecord {
    pub hour: String,
    pub hour_utc: String,
    pub observed: f64,
    pub trend: f64,
    pub seasonal_24: f64,
    pub seasonal_168: f64,
    pub residual: f64,
}

pub fn series_records(series: &MaterializedSeries) -> Vec<SeriesRecord> {
    series
        .points()
        .iter()
        .map(|p| SeriesRecord {
            hour: p.hour.to_rfc3339(),
            hour_utc: p.utc_hour().to_rfc3339(),
            n_obs: p.n_obs,
            n_device: p.n_device,
            n_flight: p.n_flight,
        })
        .collect()
}

pub fn decomposition_records(result: &DecompositionResult) -> Vec<DecompositionRecord> {
    result
        .points()
        .iter()
        .map(|p| DecompositionRecord {
            hour: p.hour.to_rfc3339(),
            hour_utc: p.utc_hour().to_rfc3339(),
            observed: p.observed,
            trend: p.trend,
            seasonal_24: p.seasonal_daily,
            seasonal_168: p.seasonal_weekly,
            residual: p.residual,
        })
        .collect()
}

/// Logs any serializable value as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes `records` to a fresh CSV file at `path` with a header row.
pub fn write_csv<T: Serialize>(path: &Path, records: &[T]) -> Result<usize> {
    debug!(path = %path.display(), rows = records.len(), "Writing CSV");

    let file = File::create(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;

    Ok(records.len())
}

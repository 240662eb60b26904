//! CLI entry point for the airplane monitor.
//!
//! Provides subcommands for rolling raw detections into hourly buckets
//! (once or on a schedule), exporting gap-filled hourly series, and
//! decomposing them into trend plus daily and weekly cycles.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use airplane_monitor::MonitorError;
use airplane_monitor::aggregate::{AggregationEngine, UpdateReport};
use airplane_monitor::config::AppConfig;
use airplane_monitor::decompose::decompose;
use airplane_monitor::output::{decomposition_records, print_json, series_records, write_csv};
use airplane_monitor::series::{Metric, local_midnight, materialize};
use airplane_monitor::store::{BucketStore, RawEventSource, SqliteBucketStore, SqliteRawEvents};
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, TimeDelta, Utc};
use clap::{Parser, Subcommand};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "airplane_monitor")]
#[command(about = "Hourly aircraft detection summaries and their daily/weekly cycles", long_about = None)]
struct Cli {
    /// JSON config file; AIRPLANE_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Aggregate every completed hour since the last run
    Update,
    /// Run `update` on a fixed interval (the single scheduled writer)
    Watch {
        /// Seconds between passes
        #[arg(short, long, default_value_t = 300)]
        interval_secs: u64,

        /// Number of passes to run (0 = infinite)
        #[arg(short = 'n', long, default_value_t = 0)]
        passes: usize,
    },
    /// Export the gap-filled hourly series in the configured timezone
    Series {
        /// First hour (RFC 3339); defaults to the first aggregated hour
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Last hour (RFC 3339); defaults to the last raw hour
        #[arg(long)]
        end: Option<DateTime<Utc>>,

        /// CSV file to write; logs JSON when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Refresh buckets, then decompose the trailing weeks into trend and cycles
    Decompose {
        /// Last local date of the window (YYYY-MM-DD); defaults to today
        #[arg(long)]
        end_date: Option<NaiveDate>,

        /// Window length in weeks
        #[arg(short, long, default_value_t = 10, value_parser = clap::value_parser!(u32).range(2..=52))]
        weeks: u32,

        /// Count column to analyse: n_obs, n_device or n_flight
        #[arg(short, long, default_value_t = Metric::NFlight)]
        metric: Metric,

        /// CSV file for the per-hour components
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/airplane_monitor.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("airplane_monitor.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.config.as_deref())?;
    info!(
        raw_db = %config.raw_db_path.display(),
        agg_db = %config.agg_db_path.display(),
        timezone = %config.timezone,
        "Configuration loaded"
    );

    match cli.command {
        Commands::Update => {
            run_update(&config)?;
        }
        Commands::Watch {
            interval_secs,
            passes,
        } => {
            watch(config, interval_secs, passes).await?;
        }
        Commands::Series { start, end, output } => {
            export_series(&config, start, end, output.as_deref())?;
        }
        Commands::Decompose {
            end_date,
            weeks,
            metric,
            output,
        } => {
            decompose_window(&config, end_date, weeks, metric, output.as_deref())?;
        }
    }

    Ok(())
}

type SqliteEngine = AggregationEngine<SqliteRawEvents, SqliteBucketStore>;

fn open_engine(config: &AppConfig) -> Result<SqliteEngine> {
    let raw = SqliteRawEvents::open(&config.raw_db_path)?;
    let buckets = SqliteBucketStore::open(&config.agg_db_path)?;
    Ok(AggregationEngine::new(raw, buckets))
}

/// One catch-up pass against the configured databases.
fn run_update(config: &AppConfig) -> Result<UpdateReport> {
    let engine = open_engine(config)?;
    let report = engine.incremental_update()?;
    info!(
        start = ?report.start,
        end = %report.end,
        hours_written = report.hours_written,
        "Update complete"
    );
    Ok(report)
}

/// Runs update passes back to back on an interval. Storage failures are
/// retried on the next tick; an integrity violation stops the loop.
#[tracing::instrument(skip(config))]
async fn watch(config: AppConfig, interval_secs: u64, passes: usize) -> Result<()> {
    let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs.max(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    if passes == 0 {
        info!(interval_secs, "Watching indefinitely. Press Ctrl+C to stop.");
    }

    let mut completed = 0;
    while passes == 0 || completed < passes {
        ticker.tick().await;
        completed += 1;

        let pass_config = config.clone();
        let outcome = tokio::task::spawn_blocking(move || run_update(&pass_config)).await?;

        if let Err(e) = outcome {
            if let Some(MonitorError::WatermarkIntegrityViolation { .. }) =
                e.downcast_ref::<MonitorError>()
            {
                error!(error = %e, "Integrity violation, stopping");
                return Err(e);
            }
            warn!(error = %e, pass = completed, "Update pass failed, retrying next tick");
        }
    }

    info!(passes = completed, "Finished watching");
    Ok(())
}

fn export_series(
    config: &AppConfig,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
    output: Option<&Path>,
) -> Result<()> {
    let tz = config.tz()?;
    let engine = open_engine(config)?;

    let start = match start {
        Some(start) => start,
        None => engine
            .buckets()
            .first_hour()?
            .context("no hourly buckets yet; run `update` first")?,
    };
    let end = match end {
        Some(end) => end,
        None => engine
            .raw()
            .last_event_hour()?
            .context("raw event store is empty")?,
    };

    let series = materialize(engine.buckets(), start, end, tz)?;
    info!(rows = series.len(), %start, %end, "Series materialized");

    match output {
        Some(path) => {
            write_csv(path, &series_records(&series))?;
            info!(path = %path.display(), "Series written");
        }
        None => print_json(&series_records(&series))?,
    }
    Ok(())
}

fn decompose_window(
    config: &AppConfig,
    end_date: Option<NaiveDate>,
    weeks: u32,
    metric: Metric,
    output: Option<&Path>,
) -> Result<()> {
    let tz = config.tz()?;
    let engine = open_engine(config)?;
    engine.incremental_update()?;

    let now = Utc::now();
    let end_date = end_date.unwrap_or_else(|| now.with_timezone(&tz).date_naive());
    let next_day = end_date
        .succ_opt()
        .with_context(|| format!("no date after {end_date}"))?;
    let window_end = local_midnight(next_day, tz)
        .with_context(|| format!("{next_day} has no local start in {tz}"))?;
    let start = window_end - TimeDelta::weeks(i64::from(weeks));

    let last = engine
        .buckets()
        .last_hour()?
        .context("no hourly buckets yet; nothing to decompose")?;
    let end = window_end.min(last);
    if end < window_end {
        info!(%window_end, %last, "Window clipped to last aggregated hour");
    }

    let series = materialize(engine.buckets(), start, end, tz)?;
    let result = decompose(&series, metric)?;

    if let Some(path) = output {
        write_csv(path, &decomposition_records(&result))?;
        info!(path = %path.display(), rows = result.len(), "Decomposition written");
    }

    print_json(&result.daily_shape(now))?;
    print_json(&result.weekly_shape(now))?;
    Ok(())
}

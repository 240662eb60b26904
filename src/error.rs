//! Error taxonomy shared by the aggregation, materialization and
//! decomposition layers.

use chrono::{DateTime, Utc};

/// Which collaborator a storage failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Raw,
    Bucket,
}

impl std::fmt::Display for StoreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreKind::Raw => f.write_str("raw event"),
            StoreKind::Bucket => f.write_str("hourly bucket"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum MonitorError {
    /// The raw or bucket store could not be reached or queried. `window` is
    /// the hour range being read or written when the failure happened.
    #[error("{store} store unavailable{}: {source}", window_suffix(.window))]
    StorageUnavailable {
        store: StoreKind,
        window: Option<(DateTime<Utc>, DateTime<Utc>)>,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A bucket for this hour already exists. The watermark or the
    /// single-writer contract was broken upstream; never retried.
    #[error("watermark integrity violation: bucket for {hour} already exists")]
    WatermarkIntegrityViolation { hour: DateTime<Utc> },

    #[error("insufficient data: {len} hourly points, at least {required} required")]
    InsufficientData { len: usize, required: usize },

    /// A series handed to decomposition is not one row per consecutive hour.
    #[error("incomplete series: expected {expected}, found {found}")]
    IncompleteSeries { expected: String, found: String },

    /// A raw event timestamp is not a UTC epoch number.
    #[error("malformed raw timestamp: {detail}")]
    MalformedTimestamp { detail: String },

    #[error("unknown timezone: {name}")]
    UnknownTimezone { name: String },
}

impl MonitorError {
    pub fn raw_unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        MonitorError::StorageUnavailable {
            store: StoreKind::Raw,
            window: None,
            source: Box::new(err),
        }
    }

    pub fn bucket_unavailable(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        MonitorError::StorageUnavailable {
            store: StoreKind::Bucket,
            window: None,
            source: Box::new(err),
        }
    }

    /// Attaches the hour range to a storage failure. Other variants already
    /// name what they refer to and are returned unchanged.
    pub fn with_window(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if let MonitorError::StorageUnavailable { window, .. } = &mut self {
            *window = Some((start, end));
        }
        self
    }
}

fn window_suffix(window: &Option<(DateTime<Utc>, DateTime<Utc>)>) -> String {
    match window {
        Some((start, end)) => format!(" for {start} .. {end}"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, MonitorError>;

//! Application configuration: database locations and display timezone.
//!
//! Values come from an optional JSON file, then environment variables
//! (`AIRPLANE_RAW_DB`, `AIRPLANE_AGG_DB`, `AIRPLANE_TIMEZONE`) override them:
//! ```json
//! {
//!   "raw_db_path": "/var/lib/adsb/planes.db",
//!   "agg_db_path": "/var/lib/adsb/planes_hourly.db",
//!   "timezone": "US/Eastern"
//! }
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::MonitorError;

pub const DEFAULT_TIMEZONE: &str = "US/Eastern";

fn default_timezone() -> String {
    DEFAULT_TIMEZONE.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    pub raw_db_path: PathBuf,
    pub agg_db_path: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            raw_db_path: PathBuf::from("planes.db"),
            agg_db_path: PathBuf::from("planes_hourly.db"),
            timezone: default_timezone(),
        }
    }
}

impl AppConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// File (or defaults) overridden by the process environment.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let base = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        Ok(base.with_overrides(|key| std::env::var(key).ok()))
    }

    /// Applies `AIRPLANE_*` overrides from `lookup`; empty values are ignored.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(raw) = get("AIRPLANE_RAW_DB") {
            self.raw_db_path = PathBuf::from(raw);
        }
        if let Some(agg) = get("AIRPLANE_AGG_DB") {
            self.agg_db_path = PathBuf::from(agg);
        }
        if let Some(tz) = get("AIRPLANE_TIMEZONE") {
            self.timezone = tz;
        }
        self
    }

    /// Parses the configured IANA timezone name.
    pub fn tz(&self) -> crate::Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| MonitorError::UnknownTimezone {
                name: self.timezone.clone(),
            })
    }
}

//! Incremental hourly aggregation.
//!
//! The watermark (latest stored hour) decides where a pass resumes and the
//! safe cutoff (start of the current hour) decides where it stops, so every
//! hour is rolled up exactly once and only after it has fully elapsed.

mod engine;
mod watermark;

pub use engine::{AggregationEngine, UpdateReport};
pub use watermark::{next_start, safe_cutoff, truncate_to_hour};

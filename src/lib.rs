pub mod aggregate;
pub mod config;
pub mod decompose;
pub mod error;
pub mod output;
pub mod series;
pub mod store;

pub use error::{MonitorError, Result};

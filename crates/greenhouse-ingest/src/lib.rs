//! Third-party data sources
//!
//! The MyFood hub publishes the latest sensor records of a production unit
//! and the FarmBot web API exposes the sequences and logs of the robot.
//! Both are reached through the [`MeasureSource`] and [`FarmbotSource`]
//! traits so the server can run against the static sources in tests.

pub mod farmbot;
pub mod myfood;
pub mod records;
pub mod simulator;
pub mod sumup;

pub use farmbot::*;
pub use myfood::*;
pub use records::*;
pub use simulator::*;
pub use sumup::*;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    #[error("Source not configured: {0}")]
    NotConfigured(String),
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Source of the latest sensor records of a greenhouse
#[async_trait::async_trait]
pub trait MeasureSource: Send + Sync {
    /// Source name/identifier
    fn name(&self) -> &str;

    /// Latest records, most recent batch first
    async fn latest_records(&self, greenhouse_id: u32) -> IngestResult<Vec<SensorRecord>>;
}

/// Source of FarmBot sequences and activity logs
#[async_trait::async_trait]
pub trait FarmbotSource: Send + Sync {
    fn name(&self) -> &str;

    /// Names of the sequences configured on the device
    async fn sequences(&self) -> IngestResult<Vec<String>>;

    async fn logs(&self) -> IngestResult<Vec<LogRecord>>;
}

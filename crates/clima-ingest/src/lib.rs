//! Reading sources: the live sensor feed and the remote history provider
//!
//! Sensor drivers turn a line-oriented byte stream into stamped
//! [`SensorSample`]s. The WeatherAPI client turns provider history responses
//! into day buckets ready for merging.

pub mod driver;
pub mod line;
pub mod simulator;
pub mod weatherapi;

pub use driver::*;
pub use line::*;
pub use simulator::*;
pub use weatherapi::*;

use chrono::{NaiveDateTime, Utc};
use chrono_tz::Tz;
use clima_core::SensorSample;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Driver error: {0}")]
    DriverError(String),

    #[error("Communication error: {0}")]
    CommunicationError(String),

    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    #[error("Sensor stream closed")]
    Closed,
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Trait for all live sensor drivers
#[async_trait::async_trait]
pub trait SensorDriver: Send + Sync {
    /// Driver name/identifier
    fn name(&self) -> &str;

    /// Open the underlying source and start reading
    async fn start(&mut self) -> IngestResult<()>;

    /// Stop the driver and release the source
    async fn stop(&mut self) -> IngestResult<()>;

    /// Wait for the next sample. Returns [`IngestError::Closed`] once the
    /// source is exhausted; any other error concerns one record only.
    async fn next_sample(&mut self) -> IngestResult<SensorSample>;

    fn is_active(&self) -> bool;
}

/// Current wall-clock time as a civil time in `tz`
pub fn local_now(tz: &Tz) -> NaiveDateTime {
    Utc::now().with_timezone(tz).naive_local()
}

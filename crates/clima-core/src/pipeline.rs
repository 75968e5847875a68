//! Seams between the reconciliation engine and its I/O collaborators

use crate::types::{Dataset, DayBucket, Location};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode dataset: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Failure talking to the history provider. Always safe to retry.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Weather provider unreachable: {0}")]
    Unavailable(String),

    #[error("Weather provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Weather provider response could not be decoded: {0}")]
    Decode(String),
}

/// Days returned by the history provider, already transformed into readings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderHistory {
    pub location: Option<Location>,
    pub days: Vec<DayBucket>,
}

/// Full-document persistence for the dataset
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Load the whole dataset; a missing document is an empty dataset
    async fn load(&self) -> StoreResult<Dataset>;

    /// Replace the stored dataset
    async fn save(&self, dataset: &Dataset) -> StoreResult<()>;
}

/// Append-only flat log of persisted hours
#[async_trait]
pub trait RecordLog: Send + Sync {
    /// Append one row per reading, returning the number of rows written
    async fn append(&self, days: &[DayBucket]) -> StoreResult<usize>;
}

/// Remote hourly history source
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn fetch_history(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProviderHistory, UpstreamError>;
}

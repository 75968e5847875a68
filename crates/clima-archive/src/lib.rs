//! Reconciliation cycles and live sensor sessions
//!
//! Owns the two write paths into the dataset: provider backfills and
//! flushes of buffered live samples. Both run under a single cycle guard.

pub mod buffer;
pub mod reconciler;
pub mod session;

pub use buffer::*;
pub use reconciler::*;
pub use session::*;

use clima_core::{StoreError, UpstreamError};
use clima_ingest::IngestError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),

    #[error("Sensor error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Buffer overflow")]
    BufferOverflow,

    #[error("A live session is already running")]
    SessionActive,

    #[error("No live session is running")]
    SessionInactive,

    #[error("Session task failed: {0}")]
    TaskFailed(String),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

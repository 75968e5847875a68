//! Persistence adapters for the reconciled dataset
//!
//! The structured document is read and rewritten whole on every cycle; the
//! CSV log only ever grows. Both sit behind the `clima_core` pipeline traits
//! so the reconciler never touches the file system directly.

pub mod csv_log;
pub mod json;
#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use csv_log::*;
pub use json::*;
#[cfg(feature = "sqlite")]
pub use sqlite::*;

pub use clima_core::{StoreError, StoreResult};

//! Core data types and reconciliation logic for the clima workspace
//!
//! Readings arrive from two places: hourly backfills from a remote history
//! provider and sub-hour samples from a live sensor. This crate owns the
//! canonical dataset shape and the pure operations that keep it sorted and
//! free of duplicate days and hours.

pub mod merge;
pub mod page;
pub mod pipeline;
pub mod planner;
pub mod rollups;
pub mod types;

pub use merge::*;
pub use page::*;
pub use pipeline::*;
pub use planner::*;
pub use rollups::*;
pub use types::*;

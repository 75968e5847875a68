//! Fetch range planning for provider backfills

use crate::types::Dataset;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Limits applied when planning a provider request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Days fetched when there is nothing stored yet
    pub default_lookback_days: u32,
    /// Longest span the provider is ever asked for
    pub max_range_days: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            default_lookback_days: 7,
            max_range_days: 7,
        }
    }
}

/// Outcome of range planning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangePlan {
    pub already_current: bool,
    pub fetch_from: NaiveDate,
    pub fetch_to: NaiveDate,
}

impl RangePlan {
    fn current(today: NaiveDate) -> Self {
        Self {
            already_current: true,
            fetch_from: today,
            fetch_to: today,
        }
    }

    fn fetch((fetch_from, fetch_to): (NaiveDate, NaiveDate)) -> Self {
        Self {
            already_current: false,
            fetch_from,
            fetch_to,
        }
    }

    pub fn span_days(&self) -> i64 {
        (self.fetch_to - self.fetch_from).num_days()
    }
}

/// The lookback window ending today, never longer than `max_range_days`
pub fn default_window(today: NaiveDate, config: &PlannerConfig) -> (NaiveDate, NaiveDate) {
    let lookback = config.default_lookback_days.min(config.max_range_days);
    let from = today - Duration::days(i64::from(lookback));
    (from, today)
}

/// Replace any span longer than `max_range_days` with the default window
pub fn clamp_range(
    from: NaiveDate,
    to: NaiveDate,
    today: NaiveDate,
    config: &PlannerConfig,
) -> (NaiveDate, NaiveDate) {
    let span = (to - from).num_days();
    if span > i64::from(config.max_range_days) {
        warn!(
            %from,
            %to,
            span,
            max = config.max_range_days,
            "requested range exceeds provider limit, using default window"
        );
        return default_window(today, config);
    }
    (from, to)
}

/// Work out which dates still have to be fetched.
///
/// `today` is the civil date in the station timezone. A dataset whose
/// latest day is today or later is reported as current and nothing is
/// fetched.
pub fn plan_range(dataset: &Dataset, today: NaiveDate, config: &PlannerConfig) -> RangePlan {
    let Some(latest) = dataset.latest_date() else {
        return RangePlan::fetch(default_window(today, config));
    };

    if latest >= today {
        return RangePlan::current(today);
    }

    let from = (latest + Duration::days(1)).min(today);
    RangePlan::fetch(clamp_range(from, today, today, config))
}

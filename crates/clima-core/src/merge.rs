//! Merging incoming day buckets into a dataset

use crate::types::{round2, Dataset, DayBucket, Reading, RAIN_THRESHOLD};
use chrono::NaiveDateTime;
use serde::Serialize;

/// How an incoming reading is applied when its (date, hour) already exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Incoming data overwrites the stored entry (authoritative backfill)
    Replace,
    /// Incoming data is averaged with the stored entry (re-aggregated live hour)
    Combine,
}

/// Counters describing what a merge did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MergeStats {
    pub new_days: usize,
    pub inserted: usize,
    pub replaced: usize,
    pub combined: usize,
}

impl MergeStats {
    pub fn touched(&self) -> usize {
        self.inserted + self.replaced + self.combined
    }
}

fn midpoint(a: f64, b: f64) -> f64 {
    round2((a + b) / 2.0)
}

fn combine_optional(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(midpoint(a, b)),
        (a, b) => a.or(b),
    }
}

fn replace_if_some<T: Copy>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

impl Reading {
    /// Blend another reading for the same hour into this one, weighting both sides equally
    pub fn combine(&mut self, other: &Reading) {
        self.temperature = midpoint(self.temperature, other.temperature);
        self.humidity = midpoint(self.humidity, other.humidity);
        self.pressure = midpoint(self.pressure, other.pressure);
        self.wind_speed = midpoint(self.wind_speed, other.wind_speed);
        self.cloud_cover = midpoint(self.cloud_cover, other.cloud_cover);
        self.rain = midpoint(f64::from(u8::from(self.rain)), f64::from(u8::from(other.rain)))
            > RAIN_THRESHOLD;
        self.precipitation_mm = combine_optional(self.precipitation_mm, other.precipitation_mm);
        self.feels_like = combine_optional(self.feels_like, other.feels_like);
        self.id = self.id.or(other.id);
    }
}

impl DayBucket {
    fn absorb_summary(&mut self, incoming: &DayBucket, policy: MergePolicy) {
        match policy {
            MergePolicy::Replace => {
                replace_if_some(&mut self.id, incoming.id);
                replace_if_some(&mut self.max_temperature, incoming.max_temperature);
                replace_if_some(&mut self.min_temperature, incoming.min_temperature);
                replace_if_some(&mut self.precipitation_mm, incoming.precipitation_mm);
            }
            MergePolicy::Combine => {
                self.id = self.id.or(incoming.id);
                self.max_temperature =
                    combine_optional(self.max_temperature, incoming.max_temperature);
                self.min_temperature =
                    combine_optional(self.min_temperature, incoming.min_temperature);
                self.precipitation_mm =
                    combine_optional(self.precipitation_mm, incoming.precipitation_mm);
            }
        }
    }
}

impl Dataset {
    /// Merge incoming days under `policy`, then restore ordering and uniqueness.
    ///
    /// The result depends only on the current contents, the incoming days and
    /// the policy. Merging the same batch twice under `Replace` leaves the
    /// dataset as it was after the first merge.
    pub fn merge<I>(&mut self, incoming: I, policy: MergePolicy) -> MergeStats
    where
        I: IntoIterator<Item = DayBucket>,
    {
        let mut stats = MergeStats::default();

        for day in incoming {
            let index = match self.days.iter().position(|d| d.date == day.date) {
                Some(index) => index,
                None => {
                    stats.new_days += 1;
                    self.days.push(DayBucket::new(day.date));
                    self.days.len() - 1
                }
            };
            let existing = &mut self.days[index];
            existing.absorb_summary(&day, policy);

            for reading in day.readings {
                match existing.readings.iter_mut().find(|r| r.hour == reading.hour) {
                    None => {
                        existing.readings.push(reading);
                        stats.inserted += 1;
                    }
                    Some(current) => match policy {
                        MergePolicy::Replace => {
                            *current = reading;
                            stats.replaced += 1;
                        }
                        MergePolicy::Combine => {
                            current.combine(&reading);
                            stats.combined += 1;
                        }
                    },
                }
            }
        }

        self.normalize();
        stats
    }
}

/// Drop readings stamped strictly after `now`, and any day left empty
pub fn discard_future(days: Vec<DayBucket>, now: NaiveDateTime) -> Vec<DayBucket> {
    days.into_iter()
        .filter_map(|mut day| {
            let date = day.date;
            day.readings.retain(|r| date.and_time(r.hour) <= now);
            (!day.readings.is_empty()).then_some(day)
        })
        .collect()
}

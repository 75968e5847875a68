//! Hourly rollups for live sensor samples

use crate::types::{
    round2, DatedReading, DayBucket, Measurements, Reading, SensorSample, RAIN_THRESHOLD,
};
use chrono::{Duration, NaiveDate, NaiveDateTime, Timelike};
use std::collections::BTreeMap;

/// Accumulator for the arithmetic mean of one field
#[derive(Debug, Clone, Default)]
pub struct Accumulator {
    sum: f64,
    count: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(self.sum / self.count as f64)
    }
}

#[derive(Debug, Default)]
struct HourAccumulator {
    temperature: Accumulator,
    humidity: Accumulator,
    pressure: Accumulator,
    wind_speed: Accumulator,
    rain: Accumulator,
    cloud_cover: Accumulator,
}

impl HourAccumulator {
    // A missing field contributes 0 so every sample counts toward every mean
    fn add(&mut self, sample: &SensorSample) {
        let value = |field: Option<f64>| field.filter(|v| v.is_finite()).unwrap_or(0.0);
        self.temperature.add(value(sample.temperature));
        self.humidity.add(value(sample.humidity));
        self.pressure.add(value(sample.pressure));
        self.wind_speed.add(value(sample.wind_speed));
        self.rain.add(value(sample.rain));
        self.cloud_cover.add(value(sample.cloud_cover));
    }

    fn finish(&self, bucket: NaiveDateTime) -> Option<DatedReading> {
        let mean = |acc: &Accumulator| round2(acc.mean().unwrap_or(0.0));
        let measurements = Measurements {
            temperature: mean(&self.temperature),
            humidity: mean(&self.humidity),
            pressure: mean(&self.pressure),
            wind_speed: mean(&self.wind_speed),
            cloud_cover: mean(&self.cloud_cover),
        };
        let rain = mean(&self.rain) > RAIN_THRESHOLD;

        match Reading::new(bucket.time(), measurements, rain) {
            Ok(reading) => Some(DatedReading {
                date: bucket.date(),
                reading,
            }),
            Err(e) => {
                tracing::warn!(error = %e, %bucket, "dropping hour with unrepresentable average");
                None
            }
        }
    }
}

/// Truncate a timestamp to the start of its hour
pub fn truncate_to_hour(timestamp: NaiveDateTime) -> NaiveDateTime {
    let into_hour = Duration::seconds(i64::from(timestamp.minute() * 60 + timestamp.second()))
        + Duration::nanoseconds(i64::from(timestamp.nanosecond()));
    timestamp - into_hour
}

/// Collapse raw samples into one averaged reading per hour.
///
/// Samples are bucketed by their timestamp truncated to the hour. Each
/// numeric field is averaged over every sample in the bucket and rounded to
/// two decimals; the averaged rain value becomes the rain flag. Output is
/// ordered by hour.
pub fn aggregate_hourly<'a, I>(samples: I) -> Vec<DatedReading>
where
    I: IntoIterator<Item = &'a SensorSample>,
{
    let mut buckets: BTreeMap<NaiveDateTime, HourAccumulator> = BTreeMap::new();

    for sample in samples {
        buckets
            .entry(truncate_to_hour(sample.timestamp))
            .or_default()
            .add(sample);
    }

    buckets
        .into_iter()
        .filter_map(|(bucket, acc)| acc.finish(bucket))
        .collect()
}

/// Group dated readings into day buckets ready for merging
pub fn group_into_days<I>(readings: I) -> Vec<DayBucket>
where
    I: IntoIterator<Item = DatedReading>,
{
    let mut days: BTreeMap<NaiveDate, Vec<Reading>> = BTreeMap::new();
    for dated in readings {
        days.entry(dated.date).or_default().push(dated.reading);
    }
    days.into_iter()
        .map(|(date, readings)| DayBucket::with_readings(date, readings))
        .collect()
}

//! Core data types for reconciled weather readings

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

/// Mean precipitation (mm, or averaged 0/1 flag) above which an hour counts as rainy
pub const RAIN_THRESHOLD: f64 = 0.1;

/// Round to two decimals, halves away from zero
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Validation error for reading construction
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReadingError {
    #[error("Non-finite value for {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },

    #[error("Invalid hour label: {0}")]
    InvalidHour(String),
}

/// Numeric measurements shared by every reading
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Measurements {
    pub temperature: f64,
    pub humidity: f64,
    pub pressure: f64,
    pub wind_speed: f64,
    pub cloud_cover: f64,
}

impl Measurements {
    fn validate(&self) -> Result<(), ReadingError> {
        let fields = [
            ("temperature", self.temperature),
            ("humidity", self.humidity),
            ("pressure", self.pressure),
            ("wind_speed", self.wind_speed),
            ("cloud_cover", self.cloud_cover),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(ReadingError::NonFinite { field, value });
            }
        }
        Ok(())
    }
}

/// One hourly observation inside a day bucket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    /// Per-day ordinal assigned by the history provider transform
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    #[serde(rename = "hora", with = "hour_label")]
    pub hour: NaiveTime,

    #[serde(rename = "temp")]
    pub temperature: f64,

    #[serde(rename = "humedad")]
    pub humidity: f64,

    #[serde(rename = "presionMb")]
    pub pressure: f64,

    #[serde(rename = "vientoKph")]
    pub wind_speed: f64,

    #[serde(rename = "lluvia", with = "rain_flag", default)]
    pub rain: bool,

    #[serde(rename = "nubes", default)]
    pub cloud_cover: f64,

    #[serde(
        rename = "precipitMm",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub precipitation_mm: Option<f64>,

    #[serde(rename = "sensacion", default, skip_serializing_if = "Option::is_none")]
    pub feels_like: Option<f64>,
}

impl Reading {
    /// Build a reading, rejecting non-finite measurements
    pub fn new(
        hour: NaiveTime,
        measurements: Measurements,
        rain: bool,
    ) -> Result<Self, ReadingError> {
        measurements.validate()?;
        Ok(Self {
            id: None,
            hour,
            temperature: measurements.temperature,
            humidity: measurements.humidity,
            pressure: measurements.pressure,
            wind_speed: measurements.wind_speed,
            rain,
            cloud_cover: measurements.cloud_cover,
            precipitation_mm: None,
            feels_like: None,
        })
    }

    pub fn with_id(mut self, id: u32) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_precipitation(mut self, millimetres: f64) -> Self {
        self.precipitation_mm = millimetres.is_finite().then_some(millimetres);
        self
    }

    pub fn with_feels_like(mut self, temperature: f64) -> Self {
        self.feels_like = temperature.is_finite().then_some(temperature);
        self
    }

    pub fn measurements(&self) -> Measurements {
        Measurements {
            temperature: self.temperature,
            humidity: self.humidity,
            pressure: self.pressure,
            wind_speed: self.wind_speed,
            cloud_cover: self.cloud_cover,
        }
    }

    /// "HH:MM" label as persisted
    pub fn label(&self) -> String {
        self.hour.format(hour_label::FORMAT).to_string()
    }
}

/// A reading paired with its calendar date, as produced by the hourly aggregator
#[derive(Debug, Clone, PartialEq)]
pub struct DatedReading {
    pub date: NaiveDate,
    pub reading: Reading,
}

impl DatedReading {
    pub fn timestamp(&self) -> NaiveDateTime {
        self.date.and_time(self.reading.hour)
    }
}

/// All readings for one calendar date
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayBucket {
    /// Position of the day in the provider response that created it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u32>,

    #[serde(rename = "fecha")]
    pub date: NaiveDate,

    #[serde(
        rename = "temperaturaMax",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub max_temperature: Option<f64>,

    #[serde(
        rename = "temperaturaMin",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub min_temperature: Option<f64>,

    #[serde(
        rename = "precipitacion",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub precipitation_mm: Option<f64>,

    #[serde(rename = "horas", default)]
    pub readings: Vec<Reading>,
}

impl DayBucket {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            id: None,
            date,
            max_temperature: None,
            min_temperature: None,
            precipitation_mm: None,
            readings: Vec::new(),
        }
    }

    pub fn with_readings(date: NaiveDate, readings: Vec<Reading>) -> Self {
        let mut day = Self::new(date);
        day.readings = readings;
        day.normalize();
        day
    }

    pub fn reading(&self, hour: NaiveTime) -> Option<&Reading> {
        self.readings.iter().find(|r| r.hour == hour)
    }

    /// Stable sort by hour, keeping the first of any repeated hour
    pub fn normalize(&mut self) {
        self.readings.sort_by_key(|r| r.hour);
        self.readings.dedup_by_key(|r| r.hour);
    }
}

/// The persisted collection of day buckets.
///
/// Days are kept sorted ascending and unique by date, and every day is
/// sorted and unique by hour. Construction and deserialization both
/// normalize, so a loaded document with repeated entries comes back clean.
/// Deserialization decodes days and hours one at a time: a malformed day or
/// hour is logged and dropped while the rest of the document loads.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(from = "DatasetDocument")]
pub struct Dataset {
    #[serde(rename = "lecturas")]
    pub(crate) days: Vec<DayBucket>,
}

#[derive(Deserialize)]
struct DatasetDocument {
    #[serde(default)]
    lecturas: Vec<Value>,
}

impl From<DatasetDocument> for Dataset {
    fn from(doc: DatasetDocument) -> Self {
        let days = doc
            .lecturas
            .into_iter()
            .enumerate()
            .filter_map(|(index, raw)| decode_day(index, raw))
            .collect();
        Self::from_days(days)
    }
}

fn decode_day(index: usize, mut raw: Value) -> Option<DayBucket> {
    let hours = raw.as_object_mut().and_then(|day| day.remove("horas"));
    let mut day: DayBucket = match serde_json::from_value(raw) {
        Ok(day) => day,
        Err(e) => {
            warn!(index, error = %e, "dropping malformed day");
            return None;
        }
    };

    let hours = match hours {
        Some(Value::Array(hours)) => hours,
        None | Some(Value::Null) => Vec::new(),
        Some(_) => {
            warn!(date = %day.date, "hours are not a list, dropping them");
            Vec::new()
        }
    };
    day.readings = hours
        .into_iter()
        .filter_map(|raw| match serde_json::from_value::<Reading>(raw) {
            Ok(reading) => Some(reading),
            Err(e) => {
                warn!(date = %day.date, error = %e, "dropping malformed hour");
                None
            }
        })
        .collect();
    Some(day)
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_days(days: Vec<DayBucket>) -> Self {
        let mut dataset = Self { days };
        dataset.normalize();
        dataset
    }

    pub fn days(&self) -> &[DayBucket] {
        &self.days
    }

    pub fn into_days(self) -> Vec<DayBucket> {
        self.days
    }

    pub fn day(&self, date: NaiveDate) -> Option<&DayBucket> {
        self.days
            .binary_search_by_key(&date, |d| d.date)
            .ok()
            .map(|i| &self.days[i])
    }

    pub fn latest_date(&self) -> Option<NaiveDate> {
        self.days.last().map(|d| d.date)
    }

    /// Number of days
    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn hour_count(&self) -> usize {
        self.days.iter().map(|d| d.readings.len()).sum()
    }

    /// Stable sort by date dropping repeated dates, then normalize each day
    pub fn normalize(&mut self) {
        self.days.sort_by_key(|d| d.date);
        self.days.dedup_by_key(|d| d.date);
        for day in &mut self.days {
            day.normalize();
        }
    }
}

/// Location metadata attached to provider responses
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Location {
    #[serde(rename = "ciudad")]
    pub name: String,
    pub region: String,
    #[serde(rename = "pais")]
    pub country: String,
}

/// Raw live sensor sample stamped with its local arrival time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SensorSample {
    pub timestamp: NaiveDateTime,

    #[serde(rename = "temperatura", skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(rename = "humedad", skip_serializing_if = "Option::is_none")]
    pub humidity: Option<f64>,

    #[serde(rename = "presion", skip_serializing_if = "Option::is_none")]
    pub pressure: Option<f64>,

    #[serde(rename = "viento", skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,

    #[serde(rename = "lluvia", skip_serializing_if = "Option::is_none")]
    pub rain: Option<f64>,

    #[serde(rename = "nubes", skip_serializing_if = "Option::is_none")]
    pub cloud_cover: Option<f64>,
}

impl SensorSample {
    pub fn at(timestamp: NaiveDateTime) -> Self {
        Self {
            timestamp,
            temperature: None,
            humidity: None,
            pressure: None,
            wind_speed: None,
            rain: None,
            cloud_cover: None,
        }
    }
}

/// Serde helpers for "HH:MM" hour labels
pub mod hour_label {
    use super::ReadingError;
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn parse(raw: &str) -> Result<NaiveTime, ReadingError> {
        NaiveTime::parse_from_str(raw.trim(), FORMAT)
            .map_err(|_| ReadingError::InvalidHour(raw.to_string()))
    }

    pub fn serialize<S: Serializer>(hour: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&hour.format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(D::Error::custom)
    }
}

/// Rain flag persisted as 0/1; booleans and raw amounts are accepted on read
mod rain_flag {
    use super::RAIN_THRESHOLD;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawFlag {
        Flag(bool),
        Amount(f64),
    }

    pub fn serialize<S: Serializer>(flag: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*flag))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        Ok(match RawFlag::deserialize(deserializer)? {
            RawFlag::Flag(flag) => flag,
            RawFlag::Amount(amount) => amount > RAIN_THRESHOLD,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hour(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn reading(h: u32, temperature: f64) -> Reading {
        Reading::new(
            hour(h),
            Measurements {
                temperature,
                ..Measurements::default()
            },
            false,
        )
        .unwrap()
    }

    #[test]
    fn test_round2_half_away_from_zero() {
        assert_eq!(round2(21.125), 21.13);
        assert_eq!(round2(-21.125), -21.13);
        assert_eq!(round2(20.0), 20.0);
    }

    #[test]
    fn test_reading_rejects_non_finite() {
        let err = Reading::new(
            hour(3),
            Measurements {
                pressure: f64::NAN,
                ..Measurements::default()
            },
            false,
        )
        .unwrap_err();
        assert!(matches!(err, ReadingError::NonFinite { field: "pressure", .. }));
    }

    #[test]
    fn test_reading_document_shape() {
        let r = Reading::new(
            hour(9),
            Measurements {
                temperature: 18.5,
                humidity: 80.0,
                pressure: 1012.0,
                wind_speed: 7.2,
                cloud_cover: 40.0,
            },
            true,
        )
        .unwrap();
        let value = serde_json::to_value(&r).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "hora": "09:00",
                "temp": 18.5,
                "humedad": 80.0,
                "presionMb": 1012.0,
                "vientoKph": 7.2,
                "lluvia": 1,
                "nubes": 40.0
            })
        );
    }

    #[test]
    fn test_reading_without_rain_or_clouds_defaults() {
        let json = r#"{"id":3,"hora":"14:00","temp":25.1,"vientoKph":9.4,"presionMb":1010,"precipitMm":0.0,"humedad":61,"sensacion":26.0}"#;
        let r: Reading = serde_json::from_str(json).unwrap();
        assert_eq!(r.hour, hour(14));
        assert_eq!(r.id, Some(3));
        assert!(!r.rain);
        assert_eq!(r.cloud_cover, 0.0);
        assert_eq!(r.feels_like, Some(26.0));
    }

    #[test]
    fn test_reading_requires_core_measurements() {
        let json = r#"{"hora":"14:00","temp":25.1}"#;
        assert!(serde_json::from_str::<Reading>(json).is_err());
    }

    #[test]
    fn test_invalid_hour_label() {
        let json = r#"{"hora":"25:99","temp":1,"humedad":1,"presionMb":1,"vientoKph":1}"#;
        assert!(serde_json::from_str::<Reading>(json).is_err());
        assert_eq!(
            hour_label::parse("noon"),
            Err(ReadingError::InvalidHour("noon".to_string()))
        );
    }

    #[test]
    fn test_dataset_deserialize_normalizes() {
        let json = r#"{
            "lecturas": [
                {"fecha": "2025-06-09", "horas": [
                    {"hora": "01:00", "temp": 1, "humedad": 1, "presionMb": 1, "vientoKph": 1},
                    {"hora": "00:00", "temp": 0, "humedad": 1, "presionMb": 1, "vientoKph": 1}
                ]},
                {"fecha": "2025-06-08", "horas": []},
                {"fecha": "2025-06-09", "horas": []}
            ]
        }"#;
        let dataset: Dataset = serde_json::from_str(json).unwrap();
        let dates: Vec<_> = dataset.days().iter().map(|d| d.date).collect();
        assert_eq!(dates, vec![date("2025-06-08"), date("2025-06-09")]);
        let hours: Vec<_> = dataset.days()[1].readings.iter().map(Reading::label).collect();
        assert_eq!(hours, vec!["00:00", "01:00"]);
    }

    #[test]
    fn test_dataset_drops_only_malformed_records() {
        let json = r#"{
            "lecturas": [
                {"fecha": "2025-06-08", "horas": [
                    {"hora": "10:00", "temp": 20, "humedad": 80, "presionMb": 1020, "vientoKph": 4}
                ]},
                {"fecha": "2025-06-09", "horas": [
                    {"hora": "10:00", "temp": 20, "humedad": 80, "presionMb": 1020, "vientoKph": 4, "lluvia": null},
                    {"hora": "11:00", "humedad": 80, "presionMb": 1020, "vientoKph": 4},
                    {"fechaHora": "2025-06-09T12:00:00", "temp": 20, "humedad": 80, "presionMb": 1020, "vientoKph": 4},
                    {"hora": "13:00", "temp": 22, "humedad": 80, "presionMb": 1020, "vientoKph": 4}
                ]},
                {"fecha": "junio", "horas": []},
                "not a day"
            ]
        }"#;
        let dataset: Dataset = serde_json::from_str(json).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.days()[0].readings.len(), 1);
        let kept: Vec<_> = dataset.days()[1].readings.iter().map(Reading::label).collect();
        assert_eq!(kept, vec!["13:00"]);
    }

    #[test]
    fn test_day_bucket_keeps_first_duplicate_hour() {
        let day = DayBucket::with_readings(
            date("2025-06-08"),
            vec![reading(5, 1.0), reading(4, 2.0), reading(5, 3.0)],
        );
        assert_eq!(day.readings.len(), 2);
        assert_eq!(day.reading(hour(5)).unwrap().temperature, 1.0);
    }

    #[test]
    fn test_dataset_lookup_and_counts() {
        let dataset = Dataset::from_days(vec![
            DayBucket::with_readings(date("2025-06-10"), vec![reading(1, 1.0)]),
            DayBucket::with_readings(date("2025-06-08"), vec![reading(1, 1.0), reading(2, 1.0)]),
        ]);
        assert_eq!(dataset.latest_date(), Some(date("2025-06-10")));
        assert_eq!(dataset.hour_count(), 3);
        assert!(dataset.day(date("2025-06-09")).is_none());
        assert!(dataset.day(date("2025-06-08")).is_some());
    }

    #[test]
    fn test_sensor_sample_serializes_present_fields() {
        let mut sample = SensorSample::at(date("2025-06-08").and_time(hour(10)));
        sample.temperature = Some(20.5);
        let value = serde_json::to_value(&sample).unwrap();
        assert_eq!(
            value,
            serde_json::json!({"timestamp": "2025-06-08T10:00:00", "temperatura": 20.5})
        );
    }
}

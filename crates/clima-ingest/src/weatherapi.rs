//! WeatherAPI.com history client
//!
//! Fetches hourly history for the station coordinates and turns it into
//! [`DayBucket`]s. Individual hours that cannot be read are dropped with a
//! warning so one bad record never sinks a whole backfill.

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use clima_core::{
    DayBucket, HistoryProvider, Location, Measurements, ProviderHistory, Reading, UpstreamError,
    RAIN_THRESHOLD,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// WeatherAPI client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WeatherApiConfig {
    /// API base URL (default: <http://api.weatherapi.com/v1>)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub latitude: f64,

    #[serde(default)]
    pub longitude: f64,

    /// Language for condition texts (default: es)
    #[serde(default = "default_lang")]
    pub lang: String,

    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_base_url() -> String {
    "http://api.weatherapi.com/v1".to_string()
}

fn default_lang() -> String {
    "es".to_string()
}

const fn default_timeout() -> u64 {
    30
}

impl Default for WeatherApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: String::new(),
            latitude: 0.0,
            longitude: 0.0,
            lang: default_lang(),
            timeout_secs: default_timeout(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryResponse {
    #[serde(default)]
    pub location: Option<LocationRecord>,
    pub forecast: ForecastRecord,
}

#[derive(Debug, Deserialize)]
pub struct LocationRecord {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Deserialize)]
pub struct ForecastRecord {
    #[serde(default)]
    pub forecastday: Vec<ForecastDayRecord>,
}

#[derive(Debug, Deserialize)]
pub struct ForecastDayRecord {
    pub date: String,
    #[serde(default)]
    pub day: Option<DaySummaryRecord>,
    /// Kept raw so each hour can be validated on its own
    #[serde(default)]
    pub hour: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct DaySummaryRecord {
    pub maxtemp_c: Option<f64>,
    pub mintemp_c: Option<f64>,
    pub totalprecip_mm: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HourRecord {
    time: String,
    temp_c: f64,
    humidity: f64,
    pressure_mb: f64,
    wind_kph: f64,
    #[serde(default)]
    precip_mm: f64,
    #[serde(default)]
    cloud: f64,
    feelslike_c: Option<f64>,
}

impl HourRecord {
    fn into_reading(self, id: u32) -> Result<(NaiveDate, Reading), String> {
        let stamp = NaiveDateTime::parse_from_str(&self.time, "%Y-%m-%d %H:%M")
            .map_err(|e| format!("bad time {:?}: {e}", self.time))?;
        let measurements = Measurements {
            temperature: self.temp_c,
            humidity: self.humidity,
            pressure: self.pressure_mb,
            wind_speed: self.wind_kph,
            cloud_cover: self.cloud,
        };
        let mut reading = Reading::new(stamp.time(), measurements, self.precip_mm > RAIN_THRESHOLD)
            .map_err(|e| e.to_string())?
            .with_id(id)
            .with_precipitation(self.precip_mm);
        if let Some(feels_like) = self.feelslike_c {
            reading = reading.with_feels_like(feels_like);
        }
        Ok((stamp.date(), reading))
    }
}

/// Convert a provider response into day buckets.
///
/// Day ids follow the response order and hour ids restart at zero for each
/// day. Hours stamped with a different date than their day are dropped.
pub fn transform_history(response: HistoryResponse) -> ProviderHistory {
    let location = response.location.map(|l| Location {
        name: l.name,
        region: l.region,
        country: l.country,
    });

    let mut days = Vec::with_capacity(response.forecast.forecastday.len());
    for (day_index, record) in response.forecast.forecastday.into_iter().enumerate() {
        let Ok(date) = NaiveDate::parse_from_str(&record.date, "%Y-%m-%d") else {
            warn!(date = %record.date, "dropping provider day with unreadable date");
            continue;
        };

        let mut readings = Vec::with_capacity(record.hour.len());
        for (hour_index, raw) in record.hour.into_iter().enumerate() {
            let parsed = serde_json::from_value::<HourRecord>(raw)
                .map_err(|e| e.to_string())
                .and_then(|h| h.into_reading(hour_index as u32));
            match parsed {
                Ok((stamp_date, reading)) if stamp_date == date => readings.push(reading),
                Ok((stamp_date, _)) => {
                    warn!(%date, %stamp_date, hour_index, "dropping provider hour filed under the wrong day");
                }
                Err(error) => warn!(%date, hour_index, %error, "dropping malformed provider hour"),
            }
        }

        let mut day = DayBucket::with_readings(date, readings);
        day.id = Some(day_index as u32);
        if let Some(summary) = record.day {
            day.max_temperature = summary.maxtemp_c;
            day.min_temperature = summary.mintemp_c;
            day.precipitation_mm = summary.totalprecip_mm;
        }
        days.push(day);
    }

    ProviderHistory { location, days }
}

/// HTTP client for the WeatherAPI history endpoint
#[derive(Debug)]
pub struct WeatherApiClient {
    client: Client,
    config: WeatherApiConfig,
}

impl WeatherApiClient {
    /// Create a new client with the given configuration
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be initialized.
    pub fn new(config: WeatherApiConfig) -> Result<Self, UpstreamError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;
        Ok(Self { client, config })
    }

    fn history_url(&self) -> String {
        format!("{}/history.json", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl HistoryProvider for WeatherApiClient {
    #[instrument(skip(self), fields(lat = self.config.latitude, lon = self.config.longitude))]
    async fn fetch_history(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<ProviderHistory, UpstreamError> {
        let coordinates = format!("{},{}", self.config.latitude, self.config.longitude);
        let from = from.format("%Y-%m-%d").to_string();
        let to = to.format("%Y-%m-%d").to_string();

        let response = self
            .client
            .get(self.history_url())
            .query(&[
                ("key", self.config.api_key.as_str()),
                ("q", coordinates.as_str()),
                ("dt", from.as_str()),
                ("end_dt", to.as_str()),
                ("lang", self.config.lang.as_str()),
            ])
            .send()
            .await
            .map_err(|e| UpstreamError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: HistoryResponse = response
            .json()
            .await
            .map_err(|e| UpstreamError::Decode(e.to_string()))?;
        let history = transform_history(body);
        debug!(days = history.days.len(), "provider history received");
        Ok(history)
    }
}

use chrono_tz::Tz;
use clima_core::PlannerConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_BIND: &str = "0.0.0.0:8080";
pub const DEFAULT_TIMEZONE: &str = "America/Bogota";
pub const DEFAULT_PROVIDER_URL: &str = "http://api.weatherapi.com/v1";
pub const DEFAULT_DOCUMENT_PATH: &str = "data/clima.json";
pub const DEFAULT_LOG_PATH: &str = "data/historial.csv";
pub const DEFAULT_SQLITE_PATH: &str = "data/clima.db";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    pub bind: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StationConfig {
    pub timezone: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Fallbacks for responses served before the provider reports a location
    pub name: Option<String>,
    pub region: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ProviderConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub lang: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SensorConfig {
    /// `serial` or `simulator`
    pub driver: Option<String>,
    pub port: Option<String>,
    pub simulator_interval_secs: Option<u64>,
    pub max_buffered_samples: Option<usize>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Json,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StorageConfig {
    pub backend: Option<StorageBackend>,
    pub document: Option<PathBuf>,
    pub log: Option<PathBuf>,
    pub sqlite: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlannerSection {
    pub default_lookback_days: Option<u32>,
    pub max_range_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// `json` or `pretty`
    pub format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    pub server: Option<ServerConfig>,
    pub station: Option<StationConfig>,
    pub provider: Option<ProviderConfig>,
    pub sensor: Option<SensorConfig>,
    pub storage: Option<StorageConfig>,
    pub planner: Option<PlannerSection>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid value for {var}: {value:?}")]
    Env { var: &'static str, value: String },
    #[error("Unknown timezone: {0}")]
    Timezone(String),
    #[error("Invalid provider URL: {0}")]
    Url(#[from] url::ParseError),
}

impl AppConfig {
    /// Load configuration from CLIMA_CONFIG path (TOML) if present, then apply
    /// environment overrides
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("CLIMA_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
        let mut cfg = Self::load_from(&path)?;
        cfg.apply_env_from(|key| std::env::var(key).ok())?;
        Ok(cfg)
    }

    /// Read a TOML file; a missing file yields defaults
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = fs::read_to_string(path)?;
        Ok(toml::from_str::<AppConfig>(&s)?)
    }

    /// Apply `PORT`, `API_KEY`, `LAT`, `LON` and `SERIAL_PORT` overrides
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("PORT") {
            let port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var: "PORT", value })?;
            self.server.get_or_insert_with(Default::default).port = Some(port);
        }
        if let Some(value) = lookup("API_KEY") {
            self.provider.get_or_insert_with(Default::default).api_key = Some(value);
        }
        if let Some(value) = lookup("LAT") {
            let lat = parse_coordinate("LAT", value)?;
            self.station.get_or_insert_with(Default::default).latitude = Some(lat);
        }
        if let Some(value) = lookup("LON") {
            let lon = parse_coordinate("LON", value)?;
            self.station.get_or_insert_with(Default::default).longitude = Some(lon);
        }
        if let Some(value) = lookup("SERIAL_PORT") {
            self.sensor.get_or_insert_with(Default::default).port = Some(value);
        }
        Ok(())
    }

    /// Get HTTP bind address (default 0.0.0.0:8080). A port override
    /// replaces the port of the configured address.
    pub fn http_bind(&self) -> String {
        let server = self.server.as_ref();
        let bind = server
            .and_then(|s| s.bind.clone())
            .unwrap_or_else(|| DEFAULT_BIND.to_string());
        match server.and_then(|s| s.port) {
            Some(port) => {
                let host = bind.rsplit_once(':').map_or(bind.as_str(), |(host, _)| host);
                format!("{host}:{port}")
            }
            None => bind,
        }
    }

    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        let name = self
            .station
            .as_ref()
            .and_then(|s| s.timezone.as_deref())
            .unwrap_or(DEFAULT_TIMEZONE);
        name.parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(name.to_string()))
    }

    /// Station coordinates as (latitude, longitude), (0, 0) when unset
    pub fn coordinates(&self) -> (f64, f64) {
        let station = self.station.as_ref();
        (
            station.and_then(|s| s.latitude).unwrap_or(0.0),
            station.and_then(|s| s.longitude).unwrap_or(0.0),
        )
    }

    /// Provider base URL, validated
    pub fn provider_base_url(&self) -> Result<Url, ConfigError> {
        let raw = self
            .provider
            .as_ref()
            .and_then(|p| p.base_url.as_deref())
            .unwrap_or(DEFAULT_PROVIDER_URL);
        Ok(Url::parse(raw)?)
    }

    pub fn api_key(&self) -> String {
        self.provider
            .as_ref()
            .and_then(|p| p.api_key.clone())
            .unwrap_or_default()
    }

    pub fn provider_lang(&self) -> String {
        self.provider
            .as_ref()
            .and_then(|p| p.lang.clone())
            .unwrap_or_else(|| "es".to_string())
    }

    pub fn provider_timeout_secs(&self) -> u64 {
        self.provider
            .as_ref()
            .and_then(|p| p.timeout_secs)
            .unwrap_or(30)
    }

    /// Sensor driver name (default `serial`)
    pub fn sensor_driver(&self) -> String {
        self.sensor
            .as_ref()
            .and_then(|s| s.driver.clone())
            .unwrap_or_else(|| "serial".to_string())
    }

    pub fn serial_port(&self) -> String {
        self.sensor
            .as_ref()
            .and_then(|s| s.port.clone())
            .unwrap_or_else(|| "/dev/ttyUSB0".to_string())
    }

    pub fn simulator_interval_secs(&self) -> u64 {
        self.sensor
            .as_ref()
            .and_then(|s| s.simulator_interval_secs)
            .unwrap_or(2)
    }

    pub fn max_buffered_samples(&self) -> usize {
        self.sensor
            .as_ref()
            .and_then(|s| s.max_buffered_samples)
            .unwrap_or(100_000)
    }

    pub fn storage_backend(&self) -> StorageBackend {
        self.storage
            .as_ref()
            .and_then(|s| s.backend)
            .unwrap_or_default()
    }

    pub fn document_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.document.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DOCUMENT_PATH))
    }

    pub fn log_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.log.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH))
    }

    pub fn sqlite_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.sqlite.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SQLITE_PATH))
    }

    pub fn planner(&self) -> PlannerConfig {
        let defaults = PlannerConfig::default();
        let section = self.planner.as_ref();
        PlannerConfig {
            default_lookback_days: section
                .and_then(|p| p.default_lookback_days)
                .unwrap_or(defaults.default_lookback_days),
            max_range_days: section
                .and_then(|p| p.max_range_days)
                .unwrap_or(defaults.max_range_days),
        }
    }

    /// Log format name (default `json`)
    pub fn log_format(&self) -> String {
        self.logging
            .as_ref()
            .and_then(|l| l.format.clone())
            .unwrap_or_else(|| "json".to_string())
    }
}

fn parse_coordinate(var: &'static str, value: String) -> Result<f64, ConfigError> {
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(v),
        _ => Err(ConfigError::Env { var, value }),
    }
}

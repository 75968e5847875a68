//! Line-oriented sensor driver: one JSON object per line from a serial device

use crate::{local_now, IngestError, IngestResult, SensorDriver};
use chrono::NaiveDateTime;
use chrono_tz::Tz;
use clima_core::SensorSample;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::{
    fs::File,
    io::{AsyncBufReadExt, BufReader, Lines},
};

#[derive(Debug, Deserialize)]
struct SensorLine {
    #[serde(default, alias = "temperature")]
    temperatura: Option<f64>,
    #[serde(default, alias = "humidity")]
    humedad: Option<f64>,
    #[serde(default, alias = "pressure")]
    presion: Option<f64>,
    #[serde(default, alias = "wind", alias = "windSpeed")]
    viento: Option<f64>,
    #[serde(default, alias = "rain")]
    lluvia: Option<f64>,
    #[serde(default, alias = "clouds", alias = "cloudCover")]
    nubes: Option<f64>,
}

/// Parse one raw sensor line and stamp it with its arrival time.
///
/// The line must be a JSON object with at least one known numeric field.
/// Unknown keys are ignored.
pub fn parse_sensor_line(line: &str, timestamp: NaiveDateTime) -> IngestResult<SensorSample> {
    let raw: SensorLine = serde_json::from_str(line.trim())
        .map_err(|e| IngestError::InvalidPacket(format!("{e}: {line:?}")))?;

    let sample = SensorSample {
        timestamp,
        temperature: raw.temperatura,
        humidity: raw.humedad,
        pressure: raw.presion,
        wind_speed: raw.viento,
        rain: raw.lluvia,
        cloud_cover: raw.nubes,
    };

    let fields = [
        sample.temperature,
        sample.humidity,
        sample.pressure,
        sample.wind_speed,
        sample.rain,
        sample.cloud_cover,
    ];
    if fields.iter().all(Option::is_none) {
        return Err(IngestError::InvalidPacket(format!(
            "no measurements in {line:?}"
        )));
    }
    Ok(sample)
}

/// Reads newline-delimited JSON from a device or file path.
///
/// Port settings such as baud rate are expected to be configured on the
/// device beforehand.
pub struct SerialLineDriver {
    path: PathBuf,
    tz: Tz,
    lines: Option<Lines<BufReader<File>>>,
    active: bool,
}

impl SerialLineDriver {
    pub fn new<P: AsRef<Path>>(path: P, tz: Tz) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            tz,
            lines: None,
            active: false,
        }
    }
}

#[async_trait::async_trait]
impl SensorDriver for SerialLineDriver {
    fn name(&self) -> &str {
        "serial"
    }

    async fn start(&mut self) -> IngestResult<()> {
        if self.active {
            return Err(IngestError::DriverError("already started".into()));
        }
        let file = File::open(&self.path).await.map_err(|e| {
            IngestError::CommunicationError(format!("{}: {e}", self.path.display()))
        })?;
        self.lines = Some(BufReader::new(file).lines());
        self.active = true;
        tracing::info!(path = %self.path.display(), "serial port opened");
        Ok(())
    }

    async fn stop(&mut self) -> IngestResult<()> {
        self.active = false;
        if self.lines.take().is_some() {
            tracing::info!(path = %self.path.display(), "serial port closed");
        }
        Ok(())
    }

    async fn next_sample(&mut self) -> IngestResult<SensorSample> {
        if !self.active {
            return Err(IngestError::DriverError("not active".into()));
        }
        let lines = self
            .lines
            .as_mut()
            .ok_or_else(|| IngestError::DriverError("port not open".into()))?;

        loop {
            let line = lines
                .next_line()
                .await
                .map_err(|e| IngestError::CommunicationError(e.to_string()))?;
            match line {
                None => return Err(IngestError::Closed),
                Some(line) if line.trim().is_empty() => continue,
                Some(line) => return parse_sensor_line(&line, local_now(&self.tz)),
            }
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

//! Simulated sensor for testing and demos

use crate::{local_now, IngestError, IngestResult, SensorDriver};
use chrono::Timelike;
use chrono_tz::Tz;
use clima_core::SensorSample;
use std::time::Duration;
use tokio::time::sleep;

/// Sensor driver that generates synthetic readings
pub struct SimulatedSensor {
    interval: Duration,
    tz: Tz,
    active: bool,
    base_temp: f64,
}

impl SimulatedSensor {
    /// Create a new simulator emitting one sample per `interval`
    pub fn new(interval: Duration, tz: Tz) -> Self {
        Self {
            interval,
            tz,
            active: false,
            base_temp: 20.0,
        }
    }

    fn generate_sample(&self) -> SensorSample {
        let timestamp = local_now(&self.tz);
        // Cheap variation that drifts with the clock
        let variation = f64::from(timestamp.second() % 100) / 10.0 - 3.0;

        SensorSample {
            temperature: Some(self.base_temp + variation),
            humidity: Some(65.0 + variation),
            pressure: Some(1013.25 + variation * 2.0),
            wind_speed: Some(5.0 + variation.abs()),
            rain: Some(0.0),
            cloud_cover: Some(f64::from(timestamp.minute())),
            ..SensorSample::at(timestamp)
        }
    }
}

#[async_trait::async_trait]
impl SensorDriver for SimulatedSensor {
    fn name(&self) -> &str {
        "simulator"
    }

    async fn start(&mut self) -> IngestResult<()> {
        if self.active {
            return Err(IngestError::DriverError("Driver already started".into()));
        }
        self.active = true;
        tracing::info!(interval = ?self.interval, "simulated sensor started");
        Ok(())
    }

    async fn stop(&mut self) -> IngestResult<()> {
        if !self.active {
            return Err(IngestError::DriverError("Driver not started".into()));
        }
        self.active = false;
        tracing::info!("simulated sensor stopped");
        Ok(())
    }

    async fn next_sample(&mut self) -> IngestResult<SensorSample> {
        if !self.active {
            return Err(IngestError::DriverError("Driver not active".into()));
        }
        sleep(self.interval).await;
        Ok(self.generate_sample())
    }

    fn is_active(&self) -> bool {
        self.active
    }
}

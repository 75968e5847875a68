//! Driver registry and management

use crate::{IngestError, IngestResult, SensorDriver, SerialLineDriver, SimulatedSensor};
use chrono_tz::Tz;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

/// Registry for available sensor drivers
pub struct DriverRegistry {
    drivers: Arc<RwLock<HashMap<String, Box<dyn DriverFactory>>>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self {
            drivers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Register a new driver factory
    pub async fn register<F>(&self, name: impl Into<String>, factory: F)
    where
        F: DriverFactory + 'static,
    {
        let mut drivers = self.drivers.write().await;
        drivers.insert(name.into(), Box::new(factory));
    }

    /// Create a fresh driver instance by name
    pub async fn create(&self, name: &str) -> IngestResult<Box<dyn SensorDriver>> {
        let drivers = self.drivers.read().await;
        let factory = drivers
            .get(name)
            .ok_or_else(|| IngestError::DriverError(format!("Unknown driver: {name}")))?;
        factory.create()
    }

    /// List all available driver names, sorted
    pub async fn list_drivers(&self) -> Vec<String> {
        let drivers = self.drivers.read().await;
        let mut names: Vec<String> = drivers.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Factory trait for creating driver instances
pub trait DriverFactory: Send + Sync {
    fn create(&self) -> IngestResult<Box<dyn SensorDriver>>;
}

/// Builds [`SerialLineDriver`]s bound to one device path
pub struct SerialDriverFactory {
    pub path: PathBuf,
    pub tz: Tz,
}

impl DriverFactory for SerialDriverFactory {
    fn create(&self) -> IngestResult<Box<dyn SensorDriver>> {
        Ok(Box::new(SerialLineDriver::new(&self.path, self.tz)))
    }
}

/// Builds [`SimulatedSensor`]s emitting at a fixed interval
pub struct SimulatorFactory {
    pub interval: Duration,
    pub tz: Tz,
}

impl DriverFactory for SimulatorFactory {
    fn create(&self) -> IngestResult<Box<dyn SensorDriver>> {
        Ok(Box::new(SimulatedSensor::new(self.interval, self.tz)))
    }
}

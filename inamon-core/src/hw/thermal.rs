//! Host temperature sources

use std::fs;
use std::path::PathBuf;

use tracing::trace;

use crate::error::{InamonError, Result};

/// Anything that reports a temperature in degrees Celsius
pub trait TemperatureSource {
    fn read_celsius(&mut self) -> Result<f64>;

    /// Short human-readable origin, used in log lines
    fn describe(&self) -> String;
}

/// sysfs thermal zone reporting millidegrees Celsius
#[derive(Debug, Clone)]
pub struct ThermalZone {
    path: PathBuf,
}

impl ThermalZone {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl TemperatureSource for ThermalZone {
    fn read_celsius(&mut self) -> Result<f64> {
        let content = fs::read_to_string(&self.path).map_err(|e| InamonError::TemperatureRead {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;

        let millidegrees: f64 = content.trim().parse().map_err(|_| InamonError::TemperatureRead {
            path: self.path.clone(),
            reason: format!("not a number: {:?}", content.trim()),
        })?;

        let celsius = millidegrees / 1000.0;
        if !celsius.is_finite() {
            return Err(InamonError::TemperatureRead {
                path: self.path.clone(),
                reason: "non-finite value".to_string(),
            });
        }

        trace!(path = %self.path.display(), celsius, "Temperature read");
        Ok(celsius)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Constant temperature, for simulation
#[derive(Debug, Clone, Copy)]
pub struct FixedTemperature(pub f64);

impl TemperatureSource for FixedTemperature {
    fn read_celsius(&mut self) -> Result<f64> {
        Ok(self.0)
    }

    fn describe(&self) -> String {
        format!("fixed {:.1} °C", self.0)
    }
}

//! Sample data types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::hw::ChannelMeasurement;

/// One successful read of one channel in one poll cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleReading {
    pub channel_id: u32,
    pub channel_name: String,
    pub address: u8,
    pub measurement: ChannelMeasurement,
    /// Bus voltage plus shunt voltage minus the channel offset
    pub corrected_voltage_v: f64,
    pub timestamp: DateTime<Utc>,
}

impl SampleReading {
    /// Row written to the sample store
    pub fn record(&self) -> SampleRecord {
        SampleRecord {
            channel_id: self.channel_id,
            bus_voltage_v: self.measurement.bus.volts,
            shunt_voltage_v: self.measurement.shunt_voltage_v,
            current_a: self.measurement.current_a,
            power_w: self.measurement.power_w,
            timestamp: unix_seconds(self.timestamp),
        }
    }
}

/// Persisted sample row
///
/// The timestamp is fractional seconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    pub channel_id: u32,
    pub bus_voltage_v: f64,
    pub shunt_voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
    pub timestamp: f64,
}

/// Fractional seconds since the Unix epoch
pub fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp() as f64 + f64::from(at.timestamp_subsec_micros()) / 1_000_000.0
}

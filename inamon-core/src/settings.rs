//! Monitor settings
//!
//! JSON settings file, by default `/etc/inamon/settings.json`. Every section
//! is optional; a missing file or section falls back to the four-rail
//! deployment this monitor was built for (solar panel, two batteries and the
//! Raspberry Pi supply on one I2C bus).

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::calibration::{self, CalibrationConfig};
use crate::constants::{limits, paths, storage, timing};
use crate::data::{validate_address, validate_file_size, validate_finite, validate_name, validate_table_name};
use crate::engine::{Direction, ExtremeKind, Quantity};
use crate::error::{InamonError, Result};

/// All monitor settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorSettings {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub temperature: TemperatureSettings,

    /// Calibration applied to every channel without its own override
    #[serde(default)]
    pub calibration: CalibrationConfig,

    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSettings>,

    #[serde(default = "default_watches")]
    pub watches: Vec<WatchSettings>,
}

/// Timing and bus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Delay between poll cycles in milliseconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Minimum time between persistence flushes in seconds
    #[serde(default = "default_persist_interval")]
    pub persist_interval_secs: u64,

    /// Upper bound for one poll cycle in milliseconds
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_ms: u64,

    /// I2C character device
    #[serde(default = "default_bus_path")]
    pub bus_path: String,
}

/// Sample store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default = "default_database_path")]
    pub database_path: String,

    #[serde(default = "default_table")]
    pub table: String,
}

/// Host temperature source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemperatureSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// sysfs file reporting millidegrees Celsius
    #[serde(default = "default_thermal_zone")]
    pub path: String,
}

/// One monitored INA219
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Stable identifier, written to the `channel` column
    pub id: u32,

    pub name: String,

    pub address: u8,

    /// Fixed correction subtracted from bus + shunt voltage, in volts
    #[serde(default)]
    pub voltage_offset_v: f64,

    /// Overrides the global calibration for this channel
    #[serde(default)]
    pub calibration: Option<CalibrationConfig>,
}

/// Threshold alert counted once per poll
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AlertSettings {
    pub threshold: f64,

    #[serde(default)]
    pub direction: Direction,
}

/// Extreme tracking
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtremeSettings {
    pub kind: ExtremeKind,

    /// Only values strictly beyond this are recorded
    #[serde(default)]
    pub baseline: Option<f64>,
}

/// One followed quantity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchSettings {
    pub name: String,

    pub quantity: Quantity,

    #[serde(default)]
    pub alert: Option<AlertSettings>,

    #[serde(default)]
    pub extreme: Option<ExtremeSettings>,
}

fn default_poll_interval() -> u64 { timing::DEFAULT_POLL_INTERVAL_MS }
fn default_persist_interval() -> u64 { timing::DEFAULT_PERSIST_INTERVAL_SECS }
fn default_cycle_timeout() -> u64 { timing::DEFAULT_CYCLE_TIMEOUT_MS }
fn default_bus_path() -> String { paths::DEFAULT_BUS_PATH.to_string() }
fn default_database_path() -> String { paths::DEFAULT_DATABASE.to_string() }
fn default_table() -> String { storage::DEFAULT_TABLE.to_string() }
fn default_thermal_zone() -> String { paths::DEFAULT_THERMAL_ZONE.to_string() }
fn default_true() -> bool { true }

fn channel(id: u32, name: &str, address: u8, voltage_offset_v: f64) -> ChannelSettings {
    ChannelSettings {
        id,
        name: name.to_string(),
        address,
        voltage_offset_v,
        calibration: None,
    }
}

fn default_channels() -> Vec<ChannelSettings> {
    vec![
        channel(1, "SOL_1", 0x40, 0.03),
        channel(2, "BAT_1", 0x41, 0.18),
        channel(3, "BAT_2", 0x42, 0.0),
        channel(4, "RB_Pi", 0x43, 0.05),
    ]
}

fn default_watches() -> Vec<WatchSettings> {
    vec![
        WatchSettings {
            name: "RB_Pi".to_string(),
            quantity: Quantity::CorrectedVoltage { channel: 4 },
            alert: Some(AlertSettings {
                threshold: 4.82,
                direction: Direction::Below,
            }),
            extreme: Some(ExtremeSettings {
                kind: ExtremeKind::Min,
                baseline: Some(5.1),
            }),
        },
        WatchSettings {
            name: "BAT_1".to_string(),
            quantity: Quantity::CorrectedVoltage { channel: 2 },
            alert: Some(AlertSettings {
                threshold: 12.40,
                direction: Direction::Below,
            }),
            extreme: None,
        },
        WatchSettings {
            name: "CPU".to_string(),
            quantity: Quantity::Temperature,
            alert: None,
            extreme: Some(ExtremeSettings {
                kind: ExtremeKind::Max,
                baseline: Some(40.0),
            }),
        },
    ]
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            general: GeneralSettings::default(),
            storage: StorageSettings::default(),
            temperature: TemperatureSettings::default(),
            calibration: CalibrationConfig::default(),
            channels: default_channels(),
            watches: default_watches(),
        }
    }
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            persist_interval_secs: default_persist_interval(),
            cycle_timeout_ms: default_cycle_timeout(),
            bus_path: default_bus_path(),
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            table: default_table(),
        }
    }
}

impl Default for TemperatureSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            path: default_thermal_zone(),
        }
    }
}

impl MonitorSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.general.poll_interval_ms)
    }

    pub fn persist_interval(&self) -> Duration {
        Duration::from_secs(self.general.persist_interval_secs)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.general.cycle_timeout_ms)
    }

    /// Calibration inputs in effect for `channel`
    pub fn channel_calibration<'a>(&'a self, channel: &'a ChannelSettings) -> &'a CalibrationConfig {
        channel.calibration.as_ref().unwrap_or(&self.calibration)
    }

    pub fn channel(&self, id: u32) -> Option<&ChannelSettings> {
        self.channels.iter().find(|c| c.id == id)
    }

    /// Check the settings can drive a monitor
    ///
    /// Any error here is fatal at startup: no channel is operated with
    /// settings that fail validation.
    pub fn validate(&self) -> Result<()> {
        let general = &self.general;
        if general.poll_interval_ms < timing::MIN_POLL_INTERVAL_MS {
            return Err(InamonError::invalid_config(
                "general.poll_interval_ms",
                format!(
                    "{} is below the minimum of {} ms",
                    general.poll_interval_ms,
                    timing::MIN_POLL_INTERVAL_MS
                ),
            ));
        }
        if general.persist_interval_secs == 0 {
            return Err(InamonError::invalid_config(
                "general.persist_interval_secs",
                "must be at least 1 second",
            ));
        }
        if general.cycle_timeout_ms == 0 {
            return Err(InamonError::invalid_config(
                "general.cycle_timeout_ms",
                "must be at least 1 ms",
            ));
        }
        if general.bus_path.trim().is_empty() {
            return Err(InamonError::invalid_config("general.bus_path", "cannot be empty"));
        }

        validate_table_name(&self.storage.table)?;
        if self.storage.database_path.trim().is_empty() {
            return Err(InamonError::invalid_config("storage.database_path", "cannot be empty"));
        }

        calibration::compute(&self.calibration)?;
        self.validate_channels()?;
        self.validate_watches()?;
        Ok(())
    }

    fn validate_channels(&self) -> Result<()> {
        if self.channels.is_empty() {
            return Err(InamonError::invalid_config("channels", "at least one channel is required"));
        }
        if self.channels.len() > limits::MAX_CHANNELS {
            return Err(InamonError::invalid_config(
                "channels",
                format!("at most {} channels fit on one bus", limits::MAX_CHANNELS),
            ));
        }

        let mut ids = HashSet::new();
        let mut addresses = HashSet::new();
        for channel in &self.channels {
            validate_name("channels.name", &channel.name)?;
            validate_address(channel.address)?;
            validate_finite("channels.voltage_offset_v", channel.voltage_offset_v)?;

            if !ids.insert(channel.id) {
                return Err(InamonError::invalid_config(
                    "channels.id",
                    format!("duplicate channel id {}", channel.id),
                ));
            }
            if !addresses.insert(channel.address) {
                return Err(InamonError::invalid_config(
                    "channels.address",
                    format!("duplicate address 0x{:02X}", channel.address),
                ));
            }
            if let Some(config) = &channel.calibration {
                calibration::compute(config).map_err(|e| {
                    InamonError::invalid_calibration(format!("channel {}: {}", channel.name, e))
                })?;
            }
        }
        Ok(())
    }

    fn validate_watches(&self) -> Result<()> {
        let mut names = HashSet::new();
        for watch in &self.watches {
            validate_name("watches.name", &watch.name)?;
            if !names.insert(watch.name.as_str()) {
                return Err(InamonError::invalid_config(
                    "watches.name",
                    format!("duplicate watch {:?}", watch.name),
                ));
            }

            match watch.quantity.channel() {
                Some(id) if self.channel(id).is_none() => {
                    return Err(InamonError::invalid_config(
                        "watches.quantity",
                        format!("watch {:?} refers to unknown channel {}", watch.name, id),
                    ));
                }
                None if !self.temperature.enabled => {
                    return Err(InamonError::invalid_config(
                        "watches.quantity",
                        format!(
                            "watch {:?} follows temperature but no temperature source is enabled",
                            watch.name
                        ),
                    ));
                }
                _ => {}
            }

            if watch.alert.is_none() && watch.extreme.is_none() {
                return Err(InamonError::invalid_config(
                    "watches",
                    format!("watch {:?} has neither an alert nor an extreme", watch.name),
                ));
            }
            if let Some(alert) = &watch.alert {
                validate_finite("watches.alert.threshold", alert.threshold)?;
            }
            if let Some(baseline) = watch.extreme.and_then(|e| e.baseline) {
                validate_finite("watches.extreme.baseline", baseline)?;
            }
        }
        Ok(())
    }
}

/// Load settings from `path`; a missing file yields the defaults
///
/// The result is not validated, call [`MonitorSettings::validate`].
pub fn load_settings(path: &Path) -> Result<MonitorSettings> {
    if !path.exists() {
        debug!("No settings file at {:?}, using defaults", path);
        return Ok(MonitorSettings::default());
    }

    validate_file_size(path)?;

    let content = fs::read_to_string(path).map_err(|e| InamonError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    let settings: MonitorSettings = serde_json::from_str(&content)?;
    info!(
        "Loaded settings from {:?}: {} channels, {} watches",
        path,
        settings.channels.len(),
        settings.watches.len()
    );
    Ok(settings)
}

/// Write settings to `path` atomically (temp file, then rename)
pub fn save_settings(path: &Path, settings: &MonitorSettings) -> Result<()> {
    use std::io::Write;

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let json = serde_json::to_string_pretty(settings)?;

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).map_err(|e| {
        InamonError::config(format!("Failed to create temp file: {}", e))
    })?;
    file.write_all(json.as_bytes()).map_err(|e| {
        InamonError::config(format!("Failed to write to temp file: {}", e))
    })?;
    file.sync_all().map_err(|e| {
        InamonError::config(format!("Failed to sync temp file: {}", e))
    })?;
    drop(file);

    fs::rename(&temp_path, path).map_err(|e| {
        InamonError::config(format!("Failed to rename temp file: {}", e))
    })?;

    debug!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_reproduce_four_rail_deployment() {
        let settings = MonitorSettings::default();
        assert!(settings.validate().is_ok());

        let names: Vec<_> = settings.channels.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["SOL_1", "BAT_1", "BAT_2", "RB_Pi"]);
        let addresses: Vec<_> = settings.channels.iter().map(|c| c.address).collect();
        assert_eq!(addresses, [0x40, 0x41, 0x42, 0x43]);
        assert_eq!(settings.channel(2).unwrap().voltage_offset_v, 0.18);

        assert_eq!(settings.poll_interval(), Duration::from_secs(2));
        assert_eq!(settings.persist_interval(), Duration::from_secs(29));
        assert_eq!(settings.storage.table, "STC_BAT_dades");
        assert_eq!(settings.watches.len(), 3);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let json = r#"{ "general": { "poll_interval_ms": 500 } }"#;
        let settings: MonitorSettings = serde_json::from_str(json).unwrap();
        assert_eq!(settings.general.poll_interval_ms, 500);
        assert_eq!(settings.general.persist_interval_secs, 29);
        assert_eq!(settings.channels.len(), 4);
        assert_eq!(settings.calibration, CalibrationConfig::range_32v_2a());
    }

    #[test]
    fn test_channel_calibration_override() {
        let json = r#"{
            "channels": [
                { "id": 1, "name": "load", "address": 64,
                  "calibration": { "max_expected_current_a": 1.0, "current_lsb_a": 0.00005 } }
            ],
            "watches": []
        }"#;
        let settings: MonitorSettings = serde_json::from_str(json).unwrap();
        let channel = &settings.channels[0];
        let config = settings.channel_calibration(channel);
        assert_eq!(config.max_expected_current_a, 1.0);
        assert_eq!(config.shunt_resistance_ohms, 0.1);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_fast_poll() {
        let mut settings = MonitorSettings::default();
        settings.general.poll_interval_ms = 10;
        assert!(matches!(
            settings.validate(),
            Err(InamonError::InvalidConfig { ref field, .. }) if field == "general.poll_interval_ms"
        ));
    }

    #[test]
    fn test_rejects_zero_persist_interval() {
        let mut settings = MonitorSettings::default();
        settings.general.persist_interval_secs = 0;
        assert!(matches!(
            settings.validate(),
            Err(InamonError::InvalidConfig { ref field, .. }) if field == "general.persist_interval_secs"
        ));
    }

    #[test]
    fn test_rejects_zero_cycle_timeout() {
        let mut settings = MonitorSettings::default();
        settings.general.cycle_timeout_ms = 0;
        assert!(matches!(
            settings.validate(),
            Err(InamonError::InvalidConfig { ref field, .. }) if field == "general.cycle_timeout_ms"
        ));
    }

    #[test]
    fn test_rejects_bad_channel_override() {
        let mut settings = MonitorSettings::default();
        settings.channels[2].calibration = Some(CalibrationConfig {
            max_expected_current_a: 10.0,
            ..Default::default()
        });
        match settings.validate() {
            Err(InamonError::InvalidCalibration { reason }) => assert!(reason.contains("BAT_2")),
            other => panic!("expected InvalidCalibration, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_duplicate_address() {
        let mut settings = MonitorSettings::default();
        settings.channels[1].address = 0x40;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_duplicate_id() {
        let mut settings = MonitorSettings::default();
        settings.channels[3].id = 1;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_address_outside_range() {
        let mut settings = MonitorSettings::default();
        settings.channels[0].address = 0x60;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_watch_on_unknown_channel() {
        let mut settings = MonitorSettings::default();
        settings.channels.retain(|c| c.id != 4);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_temperature_watch_without_source() {
        let mut settings = MonitorSettings::default();
        settings.temperature.enabled = false;
        assert!(settings.validate().is_err());

        settings.watches.retain(|w| w.quantity != Quantity::Temperature);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_rejects_non_finite_values() {
        let mut settings = MonitorSettings::default();
        settings.channels[0].voltage_offset_v = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = MonitorSettings::default();
        settings.watches[1].alert = Some(AlertSettings {
            threshold: f64::INFINITY,
            direction: Direction::Below,
        });
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_table_and_calibration() {
        let mut settings = MonitorSettings::default();
        settings.storage.table = "samples;".into();
        assert!(settings.validate().is_err());

        let mut settings = MonitorSettings::default();
        settings.calibration.max_expected_current_a = 5.0;
        assert!(matches!(
            settings.validate(),
            Err(InamonError::InvalidCalibration { .. })
        ));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = load_settings(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, MonitorSettings::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("etc").join("settings.json");

        let mut settings = MonitorSettings::default();
        settings.general.poll_interval_ms = 1_000;
        settings.channels[0].name = "Solar".into();
        save_settings(&path, &settings).unwrap();

        assert_eq!(load_settings(&path).unwrap(), settings);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(load_settings(&path), Err(InamonError::JsonParse(_))));
    }
}

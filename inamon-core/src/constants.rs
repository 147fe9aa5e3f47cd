//! Constants and configuration values for Inamon
//!
//! Centralizes device constants, paths, and configuration defaults.
//! Values under `device` describe the INA219 itself and come from the
//! datasheet; `timing` and `storage` hold the reference deployment's defaults.

/// System paths
pub mod paths {
    /// Configuration directory
    pub const CONFIG_DIR: &str = "/etc/inamon";

    /// Settings file inside the configuration directory
    pub const SETTINGS_FILE: &str = "settings.json";

    /// Environment variable overriding the settings path
    pub const CONFIG_ENV: &str = "INAMON_CONFIG";

    /// Default I2C character device (Raspberry Pi header bus)
    pub const DEFAULT_BUS_PATH: &str = "/dev/i2c-1";

    /// Default SoC temperature source (millidegrees Celsius)
    pub const DEFAULT_THERMAL_ZONE: &str = "/sys/class/thermal/thermal_zone0/temp";

    /// Default sample database
    pub const DEFAULT_DATABASE: &str = "/var/lib/inamon/samples.db";

    /// Resolve the settings path: explicit argument, then `INAMON_CONFIG`,
    /// then `/etc/inamon/settings.json`.
    pub fn settings_path(explicit: Option<&std::path::Path>) -> std::path::PathBuf {
        if let Some(path) = explicit {
            return path.to_path_buf();
        }
        if let Ok(env_path) = std::env::var(CONFIG_ENV) {
            if !env_path.trim().is_empty() {
                return std::path::PathBuf::from(env_path);
            }
        }
        std::path::Path::new(CONFIG_DIR).join(SETTINGS_FILE)
    }
}

/// INA219 register-level constants
pub mod device {
    /// Shunt voltage register LSB in volts (10 µV)
    pub const SHUNT_VOLTAGE_LSB_V: f64 = 0.000_01;

    /// Bus voltage register LSB in volts (4 mV), applied after `>> 3`
    pub const BUS_VOLTAGE_LSB_V: f64 = 0.004;

    /// Bus voltage register: number of status bits below the value
    pub const BUS_VOLTAGE_SHIFT: u16 = 3;

    /// Bus voltage register: math overflow flag
    pub const BUS_OVF_BIT: u16 = 1 << 0;

    /// Bus voltage register: conversion ready flag
    pub const BUS_CNVR_BIT: u16 = 1 << 1;

    /// Fixed scaling constant of the calibration equation
    pub const CALIBRATION_SCALE: f64 = 0.040_96;

    /// Power LSB is always this multiple of the current LSB
    pub const POWER_LSB_RATIO: f64 = 20.0;

    /// Smallest allowed current LSB divisor (15-bit resolution)
    pub const MIN_LSB_DIVISOR: f64 = 32_767.0;

    /// Largest allowed current LSB divisor (12-bit resolution)
    pub const MAX_LSB_DIVISOR: f64 = 4_096.0;

    /// Largest positive signed register count
    pub const MAX_SIGNED_COUNT: f64 = 32_767.0;

    /// Configuration register bit offsets
    pub const CONFIG_RANGE_SHIFT: u16 = 13;
    pub const CONFIG_GAIN_SHIFT: u16 = 11;
    pub const CONFIG_BADC_SHIFT: u16 = 7;
    pub const CONFIG_SADC_SHIFT: u16 = 3;

    /// Lowest and highest strap-selectable device addresses
    pub const MIN_ADDRESS: u8 = 0x40;
    pub const MAX_ADDRESS: u8 = 0x4F;
}

/// Timing limits and defaults
pub mod timing {
    /// Sampling poll interval (2 seconds)
    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;

    /// Floor for the poll interval
    pub const MIN_POLL_INTERVAL_MS: u64 = 50;

    /// Minimum time between persistence flushes
    pub const DEFAULT_PERSIST_INTERVAL_SECS: u64 = 29;

    /// Upper bound for one complete poll cycle
    pub const DEFAULT_CYCLE_TIMEOUT_MS: u64 = 1_000;

    /// Consecutive failed cycles before an escalated log line
    pub const MAX_CONSECUTIVE_ERRORS: u32 = 10;
}

/// Persistence limits
pub mod storage {
    /// Default table, compatible with the existing dashboard database
    pub const DEFAULT_TABLE: &str = "STC_BAT_dades";

    /// Maximum identifier length accepted for the table name
    pub const MAX_TABLE_NAME_LEN: usize = 64;
}

/// Input limits
pub mod limits {
    /// Maximum settings file size in bytes
    pub const MAX_SETTINGS_SIZE: u64 = 1024 * 1024;

    /// Maximum channel or watch name length
    pub const MAX_NAME_LEN: usize = 32;

    /// A single bus can address at most 16 devices (0x40-0x4F)
    pub const MAX_CHANNELS: usize = 16;
}

/// Display formats
pub mod display {
    /// Local wall-clock format used in status lines
    pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y, %H:%M:%S";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_settings_path_wins() {
        let p = paths::settings_path(Some(std::path::Path::new("/tmp/x.json")));
        assert_eq!(p, std::path::PathBuf::from("/tmp/x.json"));
    }

    #[test]
    fn test_lsb_divisors_are_ordered() {
        assert!(device::MIN_LSB_DIVISOR > device::MAX_LSB_DIVISOR);
    }
}

//! Calibration engine for the INA219
//!
//! Maps a configuration (bus range, shunt gain, shunt resistance, expected
//! current, chosen current LSB) to the two register values that arm a channel
//! and to the scale factors that turn raw counts back into amperes and watts.
//!
//! # Procedure
//!
//! 1. `max_possible_current = full_scale_shunt_voltage / shunt_resistance`
//! 2. The chosen current LSB must lie in `[max_expected / 32767, max_expected / 4096]`
//! 3. `calibration = trunc(0.04096 / (current_lsb * shunt_resistance))`
//! 4. `power_lsb = 20 * current_lsb`
//! 5. Overflow limits for current, shunt voltage and power
//!
//! Everything here is a pure function of its input.

use serde::{Deserialize, Serialize};

use crate::constants::device;
use crate::error::{InamonError, Result};

/// Relative slack used when truncating the calibration value and when
/// comparing the current LSB against its bounds.
const FLOAT_SLACK: f64 = 1e-9;

/// Full-scale bus voltage range (BRNG bit)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BusVoltageRange {
    #[serde(rename = "16V")]
    Range16V = 0x00,
    #[serde(rename = "32V")]
    Range32V = 0x01,
}

impl BusVoltageRange {
    pub fn full_scale_volts(self) -> f64 {
        match self {
            Self::Range16V => 16.0,
            Self::Range32V => 32.0,
        }
    }
}

/// Shunt programmable gain (PG bits) and the matching full-scale shunt voltage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShuntGain {
    /// Gain 1, ±40 mV
    #[serde(rename = "div1_40mv")]
    Div1 = 0x00,
    /// Gain /2, ±80 mV
    #[serde(rename = "div2_80mv")]
    Div2 = 0x01,
    /// Gain /4, ±160 mV
    #[serde(rename = "div4_160mv")]
    Div4 = 0x02,
    /// Gain /8, ±320 mV
    #[serde(rename = "div8_320mv")]
    Div8 = 0x03,
}

impl ShuntGain {
    pub fn full_scale_volts(self) -> f64 {
        match self {
            Self::Div1 => 0.04,
            Self::Div2 => 0.08,
            Self::Div4 => 0.16,
            Self::Div8 => 0.32,
        }
    }
}

/// ADC resolution / averaging for the bus or shunt conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdcResolution {
    /// 9 bit, 84 µs
    #[serde(rename = "9bit")]
    Bits9 = 0x00,
    /// 10 bit, 148 µs
    #[serde(rename = "10bit")]
    Bits10 = 0x01,
    /// 11 bit, 276 µs
    #[serde(rename = "11bit")]
    Bits11 = 0x02,
    /// 12 bit, 532 µs
    #[serde(rename = "12bit")]
    Bits12 = 0x03,
    #[serde(rename = "12bit_2s")]
    Samples2 = 0x09,
    #[serde(rename = "12bit_4s")]
    Samples4 = 0x0A,
    #[serde(rename = "12bit_8s")]
    Samples8 = 0x0B,
    #[serde(rename = "12bit_16s")]
    Samples16 = 0x0C,
    /// 12 bit, 32 samples averaged, 17.02 ms
    #[serde(rename = "12bit_32s")]
    Samples32 = 0x0D,
    #[serde(rename = "12bit_64s")]
    Samples64 = 0x0E,
    /// 12 bit, 128 samples averaged, 68.10 ms
    #[serde(rename = "12bit_128s")]
    Samples128 = 0x0F,
}

/// Operating mode (MODE bits)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    PowerDown = 0x00,
    ShuntTriggered = 0x01,
    BusTriggered = 0x02,
    ShuntAndBusTriggered = 0x03,
    AdcOff = 0x04,
    ShuntContinuous = 0x05,
    BusContinuous = 0x06,
    ShuntAndBusContinuous = 0x07,
}

/// Inputs of the calibration procedure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    pub bus_voltage_range: BusVoltageRange,
    pub gain: ShuntGain,
    pub bus_adc: AdcResolution,
    pub shunt_adc: AdcResolution,
    pub mode: OperatingMode,
    pub shunt_resistance_ohms: f64,
    pub max_expected_current_a: f64,
    /// Chosen current per bit; a round number near `max_expected / 32767`
    pub current_lsb_a: f64,
}

impl CalibrationConfig {
    /// 32 V, 2 A design point on a 0.1 Ω shunt. Counter overflow at 3.2 A.
    pub fn range_32v_2a() -> Self {
        Self {
            bus_voltage_range: BusVoltageRange::Range32V,
            gain: ShuntGain::Div8,
            bus_adc: AdcResolution::Samples32,
            shunt_adc: AdcResolution::Samples32,
            mode: OperatingMode::ShuntAndBusContinuous,
            shunt_resistance_ohms: 0.1,
            max_expected_current_a: 2.0,
            current_lsb_a: 0.000_1,
        }
    }

    /// Pack the configuration register
    pub fn config_register(&self) -> u16 {
        (self.bus_voltage_range as u16) << device::CONFIG_RANGE_SHIFT
            | (self.gain as u16) << device::CONFIG_GAIN_SHIFT
            | (self.bus_adc as u16) << device::CONFIG_BADC_SHIFT
            | (self.shunt_adc as u16) << device::CONFIG_SADC_SHIFT
            | self.mode as u16
    }
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self::range_32v_2a()
    }
}

/// Per-bit scale factors used to convert the current and power registers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DerivedScaleFactors {
    pub current_lsb_a: f64,
    pub power_lsb_w: f64,
}

/// Largest values the channel can represent before a register saturates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverflowLimits {
    pub max_current_a: f64,
    pub max_shunt_voltage_v: f64,
    pub max_power_w: f64,
}

/// Result of the calibration procedure
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub scale: DerivedScaleFactors,
    pub calibration_register: u16,
    pub config_register: u16,
    pub limits: OverflowLimits,
}

fn require_positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(InamonError::invalid_calibration(format!(
            "{} must be a positive finite number, got {}",
            name, value
        )));
    }
    Ok(())
}

/// Compute register values and scale factors for a configuration
///
/// # Errors
/// - [`InamonError::InvalidCalibration`] when an input is not positive, when the
///   expected current exceeds what the shunt range can measure, or when the
///   current LSB is outside `[max_expected / 32767, max_expected / 4096]`.
/// - [`InamonError::CalibrationOverflow`] when the truncated calibration value
///   is zero or larger than 65535.
pub fn compute(config: &CalibrationConfig) -> Result<Calibration> {
    let r_shunt = config.shunt_resistance_ohms;
    let max_expected = config.max_expected_current_a;
    let current_lsb = config.current_lsb_a;

    require_positive("shunt_resistance_ohms", r_shunt)?;
    require_positive("max_expected_current_a", max_expected)?;
    require_positive("current_lsb_a", current_lsb)?;

    let vshunt_max = config.gain.full_scale_volts();
    let max_possible = vshunt_max / r_shunt;
    if max_expected > max_possible * (1.0 + FLOAT_SLACK) {
        return Err(InamonError::invalid_calibration(format!(
            "max expected current {} A exceeds {} A measurable with a {} V shunt range across {} Ω",
            max_expected, max_possible, vshunt_max, r_shunt
        )));
    }

    let min_lsb = max_expected / device::MIN_LSB_DIVISOR;
    let max_lsb = max_expected / device::MAX_LSB_DIVISOR;
    if current_lsb < min_lsb * (1.0 - FLOAT_SLACK) || current_lsb > max_lsb * (1.0 + FLOAT_SLACK) {
        return Err(InamonError::invalid_calibration(format!(
            "current LSB {} A outside [{}, {}] for {} A expected",
            current_lsb, min_lsb, max_lsb, max_expected
        )));
    }

    // Exact design points (e.g. 0.1 mA * 0.1 Ω) land a hair below the integer in f64.
    let raw = device::CALIBRATION_SCALE / (current_lsb * r_shunt);
    let truncated = (raw * (1.0 + FLOAT_SLACK)).floor();
    if truncated < 1.0 || truncated > f64::from(u16::MAX) {
        return Err(InamonError::CalibrationOverflow { value: truncated });
    }
    let calibration_register = truncated as u16;

    let max_current = (current_lsb * device::MAX_SIGNED_COUNT).min(max_possible);
    let max_shunt_voltage = (max_current * r_shunt).min(vshunt_max);
    let max_power = max_current * config.bus_voltage_range.full_scale_volts();

    Ok(Calibration {
        scale: DerivedScaleFactors {
            current_lsb_a: current_lsb,
            power_lsb_w: device::POWER_LSB_RATIO * current_lsb,
        },
        calibration_register,
        config_register: config.config_register(),
        limits: OverflowLimits {
            max_current_a: max_current,
            max_shunt_voltage_v: max_shunt_voltage,
            max_power_w: max_power,
        },
    })
}

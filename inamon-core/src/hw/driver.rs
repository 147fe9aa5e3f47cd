//! INA219 channel driver
//!
//! One [`Ina219`] per physical device. The driver owns the computed
//! [`Calibration`] and rewrites the calibration register before every shunt
//! and bus read, so a device that browned out and lost its calibration keeps
//! producing correct current and power values after the next read.

use serde::Serialize;
use tracing::{debug, trace};

use super::transport::{Register, RegisterTransport};
use crate::calibration::{self, Calibration, CalibrationConfig, DerivedScaleFactors};
use crate::constants::device;
use crate::error::Result;

/// Decoded bus voltage register
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BusVoltage {
    pub volts: f64,
    /// Power or current calculation overflowed (OVF)
    pub overflow: bool,
    /// Conversion completed since the last power read (CNVR)
    pub conversion_ready: bool,
}

impl BusVoltage {
    pub fn from_raw(raw: u16) -> Self {
        Self {
            volts: f64::from(raw >> device::BUS_VOLTAGE_SHIFT) * device::BUS_VOLTAGE_LSB_V,
            overflow: raw & device::BUS_OVF_BIT != 0,
            conversion_ready: raw & device::BUS_CNVR_BIT != 0,
        }
    }
}

/// One full read of a channel in physical units
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ChannelMeasurement {
    pub shunt_voltage_v: f64,
    pub bus: BusVoltage,
    pub current_a: f64,
    pub power_w: f64,
}

/// Interpret a raw register word as a signed 16-bit count
pub fn twos_complement(raw: u16) -> i32 {
    let value = i32::from(raw);
    if value > i32::from(i16::MAX) {
        value - 65_536
    } else {
        value
    }
}

/// Driver for one INA219 at a fixed bus address
#[derive(Debug)]
pub struct Ina219<B> {
    bus: B,
    address: u8,
    calibration: Calibration,
    needs_init: bool,
}

impl<B: RegisterTransport> Ina219<B> {
    /// Compute the calibration for `config` and bind it to `address`
    ///
    /// Nothing is written to the device until [`Ina219::initialize`].
    pub fn new(bus: B, address: u8, config: &CalibrationConfig) -> Result<Self> {
        let calibration = calibration::compute(config)?;
        Ok(Self::with_calibration(bus, address, calibration))
    }

    pub fn with_calibration(bus: B, address: u8, calibration: Calibration) -> Self {
        Self {
            bus,
            address,
            calibration,
            needs_init: true,
        }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    pub fn calibration(&self) -> &Calibration {
        &self.calibration
    }

    pub fn scale(&self) -> &DerivedScaleFactors {
        &self.calibration.scale
    }

    /// True until the first successful `initialize` and after any bus failure
    pub fn needs_init(&self) -> bool {
        self.needs_init
    }

    /// Arm the device: calibration register, then configuration register
    pub fn initialize(&mut self) -> Result<()> {
        self.write(Register::Calibration, self.calibration.calibration_register)?;
        self.write(Register::Config, self.calibration.config_register)?;
        self.needs_init = false;
        debug!(
            address = format_args!("0x{:02X}", self.address),
            calibration = self.calibration.calibration_register,
            config = format_args!("0x{:04X}", self.calibration.config_register),
            "Channel initialized"
        );
        Ok(())
    }

    /// Shunt voltage in volts (signed)
    pub fn read_shunt_voltage(&mut self) -> Result<f64> {
        self.reassert_calibration()?;
        let raw = self.read(Register::ShuntVoltage)?;
        Ok(f64::from(twos_complement(raw)) * device::SHUNT_VOLTAGE_LSB_V)
    }

    /// Bus voltage with the OVF and CNVR status bits
    pub fn read_bus_voltage(&mut self) -> Result<BusVoltage> {
        self.reassert_calibration()?;
        let raw = self.read(Register::BusVoltage)?;
        Ok(BusVoltage::from_raw(raw))
    }

    /// Current in amperes (signed)
    pub fn read_current(&mut self) -> Result<f64> {
        let raw = self.read(Register::Current)?;
        Ok(f64::from(twos_complement(raw)) * self.calibration.scale.current_lsb_a)
    }

    /// Power in watts
    pub fn read_power(&mut self) -> Result<f64> {
        let raw = self.read(Register::Power)?;
        Ok(f64::from(twos_complement(raw)) * self.calibration.scale.power_lsb_w)
    }

    /// Shunt, bus, current and power, in that order
    pub fn read_all(&mut self) -> Result<ChannelMeasurement> {
        let shunt_voltage_v = self.read_shunt_voltage()?;
        let bus = self.read_bus_voltage()?;
        let current_a = self.read_current()?;
        let power_w = self.read_power()?;
        Ok(ChannelMeasurement {
            shunt_voltage_v,
            bus,
            current_a,
            power_w,
        })
    }

    fn reassert_calibration(&mut self) -> Result<()> {
        self.write(Register::Calibration, self.calibration.calibration_register)
    }

    fn read(&mut self, register: Register) -> Result<u16> {
        match self.bus.read_register(self.address, register) {
            Ok(raw) => {
                trace!(address = self.address, ?register, raw, "Register read");
                Ok(raw)
            }
            Err(e) => {
                self.needs_init = true;
                Err(e)
            }
        }
    }

    fn write(&mut self, register: Register, value: u16) -> Result<()> {
        let result = self.bus.write_register(self.address, register, value);
        if result.is_err() {
            self.needs_init = true;
        }
        result
    }
}

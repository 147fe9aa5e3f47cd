//! Simulated register bus
//!
//! A register file per device address that answers like an INA219: current
//! and power are derived from the shunt and bus registers with the device's
//! own fixed-point math, using whatever calibration value was last written.
//! Used by tests and by `inamond --simulate`.

use std::collections::HashMap;

use super::transport::{Register, RegisterTransport};
use crate::constants::device;
use crate::error::{InamonError, Result};

/// A write observed by the simulated bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterWrite {
    pub address: u8,
    pub register: Register,
    pub value: u16,
}

#[derive(Debug, Clone, Default)]
struct SimulatedDevice {
    registers: [u16; 6],
    failing: bool,
}

impl SimulatedDevice {
    /// Recompute CURRENT and POWER from SHUNT, BUS and CALIBRATION
    fn convert(&mut self) {
        let shunt = i64::from(self.registers[Register::ShuntVoltage as usize] as i16);
        let bus = i64::from(self.registers[Register::BusVoltage as usize] >> device::BUS_VOLTAGE_SHIFT);
        let cal = i64::from(self.registers[Register::Calibration as usize]);

        let current = (shunt * cal / 4096).clamp(i64::from(i16::MIN), i64::from(i16::MAX));
        let power = (current.abs() * bus / 5000).min(i64::from(u16::MAX));

        self.registers[Register::Current as usize] = current as i16 as u16;
        self.registers[Register::Power as usize] = power as u16;
    }
}

/// In-memory stand-in for an I2C bus with INA219 devices on it
#[derive(Debug, Default)]
pub struct SimulatedBus {
    devices: HashMap<u8, SimulatedDevice>,
    writes: Vec<RegisterWrite>,
}

impl SimulatedBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a device that answers at `address`
    pub fn add_device(&mut self, address: u8) -> &mut Self {
        self.devices.entry(address).or_default();
        self
    }

    /// Set the analog inputs of a device: bus voltage and shunt voltage in volts
    pub fn set_rail(&mut self, address: u8, bus_volts: f64, shunt_volts: f64) {
        let device = self.devices.entry(address).or_default();
        let shunt_counts = (shunt_volts / device::SHUNT_VOLTAGE_LSB_V)
            .round()
            .clamp(f64::from(i16::MIN), f64::from(i16::MAX)) as i16;
        let bus_counts = (bus_volts / device::BUS_VOLTAGE_LSB_V).round().clamp(0.0, 8191.0) as u16;

        device.registers[Register::ShuntVoltage as usize] = shunt_counts as u16;
        device.registers[Register::BusVoltage as usize] =
            (bus_counts << device::BUS_VOLTAGE_SHIFT) | device::BUS_CNVR_BIT;
        device.convert();
    }

    /// Overwrite a raw register, bypassing the conversion model
    pub fn set_register(&mut self, address: u8, register: Register, value: u16) {
        let device = self.devices.entry(address).or_default();
        device.registers[register as usize] = value;
    }

    /// Make every transfer to `address` fail until cleared
    pub fn set_failing(&mut self, address: u8, failing: bool) {
        if let Some(device) = self.devices.get_mut(&address) {
            device.failing = failing;
        }
    }

    pub fn register(&self, address: u8, register: Register) -> Option<u16> {
        self.devices.get(&address).map(|d| d.registers[register as usize])
    }

    pub fn writes(&self) -> &[RegisterWrite] {
        &self.writes
    }

    pub fn clear_writes(&mut self) {
        self.writes.clear();
    }

    fn device_mut(&mut self, address: u8, register: Register) -> Result<&mut SimulatedDevice> {
        match self.devices.get_mut(&address) {
            Some(device) if device.failing => Err(InamonError::transport(
                address,
                register.address(),
                "simulated bus fault",
            )),
            Some(device) => Ok(device),
            None => Err(InamonError::transport(
                address,
                register.address(),
                "no device acknowledged",
            )),
        }
    }
}

impl RegisterTransport for SimulatedBus {
    fn read_register(&mut self, address: u8, register: Register) -> Result<u16> {
        let device = self.device_mut(address, register)?;
        Ok(device.registers[register as usize])
    }

    fn write_register(&mut self, address: u8, register: Register, value: u16) -> Result<()> {
        if !register.is_writable() {
            return Err(InamonError::transport(
                address,
                register.address(),
                "register is read-only",
            ));
        }
        let device = self.device_mut(address, register)?;
        device.registers[register as usize] = value;
        if register == Register::Calibration {
            device.convert();
        }
        self.writes.push(RegisterWrite {
            address,
            register,
            value,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationConfig;
    use crate::hw::driver::Ina219;

    #[test]
    fn test_unknown_address_does_not_acknowledge() {
        let mut bus = SimulatedBus::new();
        let err = bus.read_register(0x44, Register::BusVoltage).unwrap_err();
        assert!(matches!(err, InamonError::Transport { address: 0x44, .. }));
    }

    #[test]
    fn test_read_only_registers_reject_writes() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x40);
        assert!(bus.write_register(0x40, Register::Current, 1).is_err());
        assert!(bus.writes().is_empty());
    }

    #[test]
    fn test_current_follows_calibration() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x40);
        bus.set_rail(0x40, 12.0, 0.01);
        // uncalibrated device reports no current
        assert_eq!(bus.register(0x40, Register::Current), Some(0));

        bus.write_register(0x40, Register::Calibration, 4096).unwrap();
        assert_eq!(bus.register(0x40, Register::Current), Some(1000));
    }

    #[test]
    fn test_driver_reads_physical_values() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x41);
        bus.set_rail(0x41, 12.6, 0.005);

        let mut ina = Ina219::new(bus, 0x41, &CalibrationConfig::range_32v_2a()).unwrap();
        ina.initialize().unwrap();
        let m = ina.read_all().unwrap();

        assert!((m.bus.volts - 12.6).abs() < 1e-9);
        assert!((m.shunt_voltage_v - 0.005).abs() < 1e-9);
        assert!((m.current_a - 0.05).abs() < 1e-9);
        // 500 counts * 3150 / 5000 = 315 counts of 2 mW
        assert!((m.power_w - 0.63).abs() < 1e-9);
    }

    #[test]
    fn test_negative_shunt_gives_negative_current() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x42);
        bus.set_rail(0x42, 12.0, -0.002);

        let mut ina = Ina219::new(bus, 0x42, &CalibrationConfig::range_32v_2a()).unwrap();
        ina.initialize().unwrap();
        assert!((ina.read_current().unwrap() + 0.02).abs() < 1e-9);
    }

    #[test]
    fn test_failing_device_reports_transport_error() {
        let mut bus = SimulatedBus::new();
        bus.add_device(0x43);
        bus.set_failing(0x43, true);
        assert!(bus.read_register(0x43, Register::Config).is_err());
        bus.set_failing(0x43, false);
        assert!(bus.read_register(0x43, Register::Config).is_ok());
    }
}

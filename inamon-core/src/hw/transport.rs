//! Register transport
//!
//! The INA219 exposes six 16-bit big-endian registers behind one bus address.
//! Everything above this module talks to the device through
//! [`RegisterTransport`]; the adapters here put that on top of an
//! `embedded-hal` I2C bus, on top of Linux `/dev/i2c-*`, or behind a lock so
//! several channels can share one physical bus.

use std::path::Path;
use std::sync::Arc;

use embedded_hal::i2c::I2c;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::error::{InamonError, Result};

/// INA219 register map
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum Register {
    /// Configuration (R/W)
    Config = 0x00,
    /// Shunt voltage (R)
    ShuntVoltage = 0x01,
    /// Bus voltage (R)
    BusVoltage = 0x02,
    /// Power (R)
    Power = 0x03,
    /// Current (R)
    Current = 0x04,
    /// Calibration (R/W)
    Calibration = 0x05,
}

impl Register {
    /// Register pointer value on the wire
    pub const fn address(self) -> u8 {
        self as u8
    }

    pub const fn is_writable(self) -> bool {
        matches!(self, Register::Config | Register::Calibration)
    }
}

/// Raw 16-bit register access to devices on one bus
#[cfg_attr(test, mockall::automock)]
pub trait RegisterTransport {
    /// Read one register of the device at `address`
    fn read_register(&mut self, address: u8, register: Register) -> Result<u16>;

    /// Write one register of the device at `address`
    fn write_register(&mut self, address: u8, register: Register, value: u16) -> Result<()>;
}

/// Transport over any `embedded-hal` 1.0 I2C bus
#[derive(Debug)]
pub struct I2cTransport<I2C> {
    i2c: I2C,
}

impl<I2C> I2cTransport<I2C> {
    pub fn new(i2c: I2C) -> Self {
        Self { i2c }
    }

    /// Give the underlying bus back
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterTransport for I2cTransport<I2C> {
    fn read_register(&mut self, address: u8, register: Register) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.i2c
            .write_read(address, &[register.address()], &mut buf)
            .map_err(|e| InamonError::transport(address, register.address(), format!("{:?}", e)))?;
        Ok(u16::from_be_bytes(buf))
    }

    fn write_register(&mut self, address: u8, register: Register, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.i2c
            .write(address, &[register.address(), hi, lo])
            .map_err(|e| InamonError::transport(address, register.address(), format!("{:?}", e)))
    }
}

/// Transport on a Linux I2C character device
pub type LinuxI2cTransport = I2cTransport<linux_embedded_hal::I2cdev>;

impl LinuxI2cTransport {
    /// Open `/dev/i2c-N`
    pub fn open(path: &Path) -> Result<Self> {
        let dev = linux_embedded_hal::I2cdev::new(path).map_err(|e| {
            InamonError::config(format!("failed to open I2C bus {}: {}", path.display(), e))
        })?;
        debug!(bus = %path.display(), "Opened I2C bus");
        Ok(Self::new(dev))
    }
}

/// One physical bus shared by several channel drivers
///
/// Every register access holds the lock for exactly one transfer, so
/// transfers from different channels never interleave.
#[derive(Debug)]
pub struct SharedBus<T> {
    inner: Arc<Mutex<T>>,
}

impl<T> SharedBus<T> {
    pub fn new(transport: T) -> Self {
        Self {
            inner: Arc::new(Mutex::new(transport)),
        }
    }

    /// Run `f` with exclusive access to the underlying transport
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.inner.lock();
        f(&mut guard)
    }
}

impl<T> Clone for SharedBus<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: RegisterTransport> RegisterTransport for SharedBus<T> {
    fn read_register(&mut self, address: u8, register: Register) -> Result<u16> {
        self.inner.lock().read_register(address, register)
    }

    fn write_register(&mut self, address: u8, register: Register, value: u16) -> Result<()> {
        self.inner.lock().write_register(address, register, value)
    }
}

//! Hardware access: register transport, INA219 driver, temperature sources

pub mod driver;
pub mod sim;
pub mod thermal;
pub mod transport;

pub use driver::{twos_complement, BusVoltage, ChannelMeasurement, Ina219};
pub use sim::{RegisterWrite, SimulatedBus};
pub use thermal::{FixedTemperature, TemperatureSource, ThermalZone};
pub use transport::{I2cTransport, LinuxI2cTransport, Register, RegisterTransport, SharedBus};

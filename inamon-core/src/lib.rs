//! Inamon Core Library
//!
//! INA219 current/power monitoring for small battery and solar installations.
//!
//! # Features
//!
//! - **Calibration**: Derives the calibration register, configuration register,
//!   per-bit scale factors and overflow limits from shunt and range settings
//! - **Driver**: Register-level INA219 driver over any `embedded-hal` I2C bus,
//!   with automatic re-arming after bus faults
//! - **Aggregation**: Per-sample threshold counters and extreme trackers
//! - **Persistence**: Rate-limited writes of samples to SQLite
//!
//! # Module Structure
//!
//! - `hw/` - Register transport, driver, simulated bus, temperature sources
//! - `data/` - Sample types, sinks, validation
//! - `engine/` - Aggregation state and persistence gate
//!
//! # Example
//!
//! ```no_run
//! use inamon_core::{
//!     LinuxI2cTransport, MemorySink, Monitor, MonitorSettings, SharedBus,
//! };
//!
//! let settings = MonitorSettings::default();
//! let bus = SharedBus::new(LinuxI2cTransport::open("/dev/i2c-1".as_ref()).unwrap());
//! let mut monitor =
//!     Monitor::from_settings(&settings, bus, MemorySink::new(), chrono::Utc::now()).unwrap();
//! monitor.initialize();
//! let report = monitor.poll_cycle(chrono::Utc::now());
//! ```

// Grouped modules
pub mod data;
pub mod engine;
pub mod hw;

// Standalone modules
pub mod calibration;
pub mod constants;
pub mod error;
pub mod monitor;
pub mod settings;

// Re-export error types
pub use error::{InamonError, Result};

// Re-export calibration types
pub use calibration::{
    compute as compute_calibration, AdcResolution, BusVoltageRange, Calibration,
    CalibrationConfig, DerivedScaleFactors, OperatingMode, OverflowLimits, ShuntGain,
};

// Re-export data types, sinks and validation
pub use data::{
    unix_seconds, validate_address, validate_table_name, MemorySink, SampleReading,
    SampleRecord, SampleSink, SqliteSink,
};

// Re-export engine types
pub use engine::{
    format_local, AggregationEvent, AggregationState, Direction, ExtremeKind, ExtremeTracker,
    PersistenceGate, Quantity, ThresholdCounter, Watch,
};

// Re-export hardware types
pub use hw::{
    BusVoltage, ChannelMeasurement, FixedTemperature, I2cTransport, Ina219, LinuxI2cTransport,
    Register, RegisterTransport, SharedBus, SimulatedBus, TemperatureSource, ThermalZone,
};

// Re-export monitor and settings
pub use monitor::{ChannelFailure, CycleReport, Monitor, MonitorStatus, MonitoredChannel};
pub use settings::{
    load_settings, save_settings, ChannelSettings, MonitorSettings, WatchSettings,
};

//! One poll-aggregate-persist cycle over every configured channel
//!
//! The monitor is synchronous and owns all run state; the daemon decides when
//! to call [`Monitor::poll_cycle`] and bounds how long it may take.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::data::{SampleReading, SampleSink};
use crate::engine::{AggregationEvent, AggregationState, CycleValues, PersistenceGate};
use crate::error::{InamonError, Result};
use crate::hw::{Ina219, RegisterTransport, TemperatureSource};
use crate::settings::{ChannelSettings, MonitorSettings};

/// A configured channel and its driver
#[derive(Debug)]
pub struct MonitoredChannel<B> {
    settings: ChannelSettings,
    driver: Ina219<B>,
}

impl<B: RegisterTransport> MonitoredChannel<B> {
    pub fn new(settings: ChannelSettings, driver: Ina219<B>) -> Self {
        Self { settings, driver }
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    pub fn driver(&self) -> &Ina219<B> {
        &self.driver
    }

    fn sample(&mut self, now: DateTime<Utc>) -> Result<SampleReading> {
        if self.driver.needs_init() {
            debug!(channel = self.settings.id, name = %self.settings.name, "Arming channel");
            self.driver.initialize()?;
        }

        let measurement = self.driver.read_all()?;
        let corrected_voltage_v =
            measurement.bus.volts + measurement.shunt_voltage_v - self.settings.voltage_offset_v;

        if measurement.bus.overflow {
            warn!(
                channel = self.settings.id,
                name = %self.settings.name,
                "Power or current calculation overflowed"
            );
        }

        Ok(SampleReading {
            channel_id: self.settings.id,
            channel_name: self.settings.name.clone(),
            address: self.settings.address,
            measurement,
            corrected_voltage_v,
            timestamp: now,
        })
    }

    fn failure(&self, error: InamonError) -> ChannelFailure {
        ChannelFailure {
            channel_id: self.settings.id,
            channel_name: self.settings.name.clone(),
            address: self.settings.address,
            error,
        }
    }
}

/// A channel that could not be read or armed
#[derive(Debug)]
pub struct ChannelFailure {
    pub channel_id: u32,
    pub channel_name: String,
    pub address: u8,
    pub error: InamonError,
}

/// Outcome of one poll cycle
#[derive(Debug)]
pub struct CycleReport {
    pub at: DateTime<Utc>,
    pub readings: Vec<SampleReading>,
    pub failures: Vec<ChannelFailure>,
    pub temperature_c: Option<f64>,
    pub events: Vec<AggregationEvent>,
    /// The persistence gate was due and a flush was attempted
    pub flushed: bool,
    /// Rows written during the flush
    pub persisted: usize,
    /// Rows the sink rejected during the flush
    pub persist_errors: usize,
}

impl CycleReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.persist_errors == 0
    }
}

/// Snapshot of run counters for status output
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    pub running_since: DateTime<Utc>,
    pub samples: u64,
    pub flushes: u64,
    pub last_flush: Option<DateTime<Utc>>,
    pub persist_interval_secs: u64,
    pub channels_needing_init: Vec<u32>,
}

/// Channels, aggregation state, persistence gate and sink
pub struct Monitor<B, S> {
    channels: Vec<MonitoredChannel<B>>,
    temperature: Option<Box<dyn TemperatureSource + Send>>,
    state: AggregationState,
    gate: PersistenceGate,
    sink: S,
}

impl<B: RegisterTransport + Clone, S: SampleSink> Monitor<B, S> {
    /// Build drivers for every configured channel on `bus`
    ///
    /// Calibration is computed here; an invalid channel calibration fails the
    /// whole monitor. Devices are not touched until [`Monitor::initialize`] or
    /// the first poll cycle.
    pub fn from_settings(
        settings: &MonitorSettings,
        bus: B,
        sink: S,
        started_at: DateTime<Utc>,
    ) -> Result<Self> {
        let channels = settings
            .channels
            .iter()
            .map(|channel| {
                let config = settings.channel_calibration(channel);
                let driver = Ina219::new(bus.clone(), channel.address, config)?;
                Ok(MonitoredChannel::new(channel.clone(), driver))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            channels,
            temperature: None,
            state: AggregationState::from_settings(&settings.watches, started_at),
            gate: PersistenceGate::new(settings.persist_interval()),
            sink,
        })
    }
}

impl<B: RegisterTransport, S: SampleSink> Monitor<B, S> {
    pub fn with_temperature_source(mut self, source: Box<dyn TemperatureSource + Send>) -> Self {
        self.temperature = Some(source);
        self
    }

    /// Arm every channel; failed channels stay flagged and are retried each cycle
    pub fn initialize(&mut self) -> Vec<ChannelFailure> {
        let mut failures = Vec::new();
        for channel in &mut self.channels {
            match channel.driver.initialize() {
                Ok(()) => info!(
                    channel = channel.settings.id,
                    name = %channel.settings.name,
                    address = format_args!("0x{:02X}", channel.settings.address),
                    "Channel armed"
                ),
                Err(e) => {
                    warn!(
                        channel = channel.settings.id,
                        name = %channel.settings.name,
                        error = %e,
                        "Failed to arm channel, will retry"
                    );
                    failures.push(channel.failure(e));
                }
            }
        }
        failures
    }

    /// Poll every channel, fold the results into the aggregation state, and
    /// flush to the sink if the persistence gate is due
    pub fn poll_cycle(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut readings = Vec::with_capacity(self.channels.len());
        let mut failures = Vec::new();

        for channel in &mut self.channels {
            match channel.sample(now) {
                Ok(reading) => readings.push(reading),
                Err(e) => {
                    warn!(
                        channel = channel.settings.id,
                        name = %channel.settings.name,
                        address = format_args!("0x{:02X}", channel.settings.address),
                        error = %e,
                        "Channel read failed"
                    );
                    failures.push(channel.failure(e));
                }
            }
        }

        let temperature_c = match self.temperature.as_mut() {
            Some(source) => match source.read_celsius() {
                Ok(celsius) => Some(celsius),
                Err(e) => {
                    warn!(source = %source.describe(), error = %e, "Temperature read failed");
                    None
                }
            },
            None => None,
        };

        let values = CycleValues::from_readings(&readings, temperature_c);
        let events = self.state.observe(&values, now);
        for event in &events {
            match event {
                AggregationEvent::ThresholdCrossed {
                    watch,
                    value,
                    threshold,
                    count,
                } => debug!(watch = %watch, value, threshold, count, "Threshold crossed"),
                AggregationEvent::NewExtreme { watch, kind, value } => {
                    info!(watch = %watch, %kind, value, "New extreme")
                }
            }
        }

        let mut report = CycleReport {
            at: now,
            readings,
            failures,
            temperature_c,
            events,
            flushed: false,
            persisted: 0,
            persist_errors: 0,
        };

        if self.gate.is_due(now) {
            for reading in &report.readings {
                match self.sink.append(&reading.record()) {
                    Ok(()) => report.persisted += 1,
                    Err(e) => {
                        report.persist_errors += 1;
                        warn!(channel = reading.channel_id, error = %e, "Failed to persist sample");
                    }
                }
            }
            self.gate.mark(now);
            self.state.record_flush();
            report.flushed = true;
        }

        report
    }

    pub fn status(&self) -> MonitorStatus {
        MonitorStatus {
            running_since: self.state.started_at(),
            samples: self.state.samples(),
            flushes: self.state.flushes(),
            last_flush: self.gate.last_flush(),
            persist_interval_secs: self.gate.interval().as_secs(),
            channels_needing_init: self
                .channels
                .iter()
                .filter(|c| c.driver.needs_init())
                .map(|c| c.settings.id)
                .collect(),
        }
    }

    pub fn state(&self) -> &AggregationState {
        &self.state
    }

    pub fn channels(&self) -> &[MonitoredChannel<B>] {
        &self.channels
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn sink_mut(&mut self) -> &mut S {
        &mut self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::MemorySink;
    use crate::hw::{FixedTemperature, Register, SharedBus, SimulatedBus};
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    /// Default four-rail layout on a simulated bus
    fn rig() -> (SharedBus<SimulatedBus>, Monitor<SharedBus<SimulatedBus>, MemorySink>) {
        let mut sim = SimulatedBus::new();
        sim.set_rail(0x40, 18.2, 0.02);
        sim.set_rail(0x41, 12.6, 0.005);
        sim.set_rail(0x42, 12.5, 0.004);
        sim.set_rail(0x43, 5.08, 0.01);
        let bus = SharedBus::new(sim);

        let settings = MonitorSettings::default();
        let monitor = Monitor::from_settings(&settings, bus.clone(), MemorySink::new(), t(0))
            .unwrap()
            .with_temperature_source(Box::new(FixedTemperature(45.0)));
        (bus, monitor)
    }

    #[test]
    fn test_first_cycle_reads_and_persists_every_channel() {
        let (_bus, mut monitor) = rig();
        let report = monitor.poll_cycle(t(0));

        assert!(report.is_clean());
        assert_eq!(report.readings.len(), 4);
        assert!(report.flushed);
        assert_eq!(report.persisted, 4);
        assert_eq!(monitor.sink().records().len(), 4);
        assert_eq!(monitor.state().samples(), 1);
        assert_eq!(monitor.state().flushes(), 1);
    }

    #[test]
    fn test_corrected_voltage_subtracts_offset() {
        let (_bus, mut monitor) = rig();
        let report = monitor.poll_cycle(t(0));
        let bat1 = report.readings.iter().find(|r| r.channel_id == 2).unwrap();
        // 12.6 + 0.005 - 0.18
        assert!((bat1.corrected_voltage_v - 12.425).abs() < 1e-9);
        assert!((bat1.measurement.current_a - 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_first_cycle_arms_devices() {
        let (bus, mut monitor) = rig();
        monitor.poll_cycle(t(0));
        assert_eq!(bus.with(|b| b.register(0x43, Register::Config)), Some(0x3EEF));
        assert!(monitor.status().channels_needing_init.is_empty());
    }

    #[test]
    fn test_temperature_feeds_watch() {
        let (_bus, mut monitor) = rig();
        monitor.poll_cycle(t(0));
        let cpu = monitor.state().watch("CPU").unwrap().extreme().unwrap();
        assert_eq!(cpu.value(), Some(45.0));
    }

    #[test]
    fn test_failed_channel_is_reported_and_retried() {
        let (bus, mut monitor) = rig();
        monitor.poll_cycle(t(0));

        bus.with(|b| b.set_failing(0x43, true));
        let report = monitor.poll_cycle(t(2));
        assert_eq!(report.readings.len(), 3);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].address, 0x43);
        assert!(report.failures[0].error.is_recoverable());
        assert_eq!(monitor.status().channels_needing_init, vec![4]);

        bus.with(|b| {
            b.set_failing(0x43, false);
            b.set_register(0x43, Register::Config, 0x399F);
            b.clear_writes();
        });
        let report = monitor.poll_cycle(t(4));
        assert!(report.is_clean());
        // re-armed: calibration then config rewritten
        let config = bus.with(|b| b.register(0x43, Register::Config));
        assert_eq!(config, Some(0x3EEF));
    }

    #[test]
    fn test_failed_channel_does_not_touch_its_watch() {
        let mut sim = SimulatedBus::new();
        sim.set_rail(0x40, 18.0, 0.0);
        sim.set_rail(0x41, 12.0, 0.0);
        sim.set_rail(0x42, 12.0, 0.0);
        sim.set_rail(0x43, 4.5, 0.0);
        sim.set_failing(0x43, true);
        let bus = SharedBus::new(sim);
        let mut monitor =
            Monitor::from_settings(&MonitorSettings::default(), bus, MemorySink::new(), t(0)).unwrap();

        monitor.poll_cycle(t(0));
        let rpi = monitor.state().watch("RB_Pi").unwrap();
        assert_eq!(rpi.counter().unwrap().count(), 0);
        assert_eq!(rpi.extreme().unwrap().value(), Some(5.1));
        // BAT_1 at 11.82 V corrected is counted
        assert_eq!(monitor.state().watch("BAT_1").unwrap().counter().unwrap().count(), 1);
    }

    #[test]
    fn test_persistence_failure_advances_gate() {
        let (_bus, mut monitor) = rig();
        monitor.sink_mut().set_failing(true);

        let report = monitor.poll_cycle(t(0));
        assert!(report.flushed);
        assert_eq!(report.persist_errors, 4);
        assert_eq!(monitor.state().flushes(), 1);

        monitor.sink_mut().set_failing(false);
        let report = monitor.poll_cycle(t(2));
        assert!(!report.flushed);
        assert_eq!(monitor.state().samples(), 2);

        let report = monitor.poll_cycle(t(30));
        assert!(report.flushed);
        assert_eq!(monitor.sink().records().len(), 4);
    }

    #[test]
    fn test_minute_of_polling_flushes_three_times() {
        let (_bus, mut monitor) = rig();
        for i in 0..=30 {
            monitor.poll_cycle(t(i * 2));
        }
        assert_eq!(monitor.state().samples(), 31);
        assert_eq!(monitor.state().flushes(), 3);
        assert_eq!(monitor.sink().records().len(), 12);
        let status = monitor.status();
        assert_eq!(status.last_flush, Some(t(60)));
        assert_eq!(status.persist_interval_secs, 29);
    }

    #[test]
    fn test_initialize_reports_missing_devices() {
        let mut sim = SimulatedBus::new();
        sim.add_device(0x40).add_device(0x41);
        let bus = SharedBus::new(sim);
        let mut monitor =
            Monitor::from_settings(&MonitorSettings::default(), bus, MemorySink::new(), t(0)).unwrap();

        let failures = monitor.initialize();
        let addresses: Vec<_> = failures.iter().map(|f| f.address).collect();
        assert_eq!(addresses, vec![0x42, 0x43]);
        assert_eq!(monitor.status().channels_needing_init, vec![3, 4]);
    }

    #[test]
    fn test_invalid_channel_calibration_fails_construction() {
        let mut settings = MonitorSettings::default();
        settings.channels[0].calibration = Some(crate::calibration::CalibrationConfig {
            current_lsb_a: 0.01,
            ..Default::default()
        });
        let result = Monitor::from_settings(
            &settings,
            SharedBus::new(SimulatedBus::new()),
            MemorySink::new(),
            t(0),
        );
        assert!(result.is_err());
    }
}

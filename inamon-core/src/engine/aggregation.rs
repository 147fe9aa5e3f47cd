//! Rolling aggregation over poll cycles
//!
//! A [`Watch`] follows one quantity (a channel's corrected voltage, current or
//! power, or the host temperature) and carries up to two trackers:
//!
//! - a [`ThresholdCounter`], incremented on **every** poll in which the value
//!   is beyond the threshold. This is a per-sample tally, not an edge count: a
//!   rail sitting below its threshold for ten polls counts ten.
//! - an [`ExtremeTracker`] recording the lowest or highest value seen and when.
//!   With a baseline, only values strictly beyond the baseline are recorded.
//!
//! [`AggregationState`] owns the watches plus the run counters and is never
//! reset while the monitor runs.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::display;
use crate::data::SampleReading;
use crate::settings::WatchSettings;

/// Side of the threshold that counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    Below,
    Above,
}

impl Direction {
    /// Strict comparison: a value equal to the threshold never counts
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Direction::Below => value < threshold,
            Direction::Above => value > threshold,
        }
    }
}

/// Which end of the range an extreme tracker follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtremeKind {
    Min,
    Max,
}

impl ExtremeKind {
    fn beats(self, candidate: f64, current: f64) -> bool {
        match self {
            ExtremeKind::Min => candidate < current,
            ExtremeKind::Max => candidate > current,
        }
    }
}

impl fmt::Display for ExtremeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtremeKind::Min => write!(f, "minimum"),
            ExtremeKind::Max => write!(f, "maximum"),
        }
    }
}

/// Quantity a watch follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Quantity {
    /// Bus + shunt - offset, in volts
    CorrectedVoltage { channel: u32 },
    /// Amperes
    Current { channel: u32 },
    /// Watts
    Power { channel: u32 },
    /// Host temperature in degrees Celsius
    Temperature,
}

impl Quantity {
    pub fn channel(&self) -> Option<u32> {
        match *self {
            Quantity::CorrectedVoltage { channel }
            | Quantity::Current { channel }
            | Quantity::Power { channel } => Some(channel),
            Quantity::Temperature => None,
        }
    }

    pub fn unit(&self) -> &'static str {
        match self {
            Quantity::CorrectedVoltage { .. } => "V",
            Quantity::Current { .. } => "A",
            Quantity::Power { .. } => "W",
            Quantity::Temperature => "°C",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::CorrectedVoltage { channel } => write!(f, "channel {} voltage", channel),
            Quantity::Current { channel } => write!(f, "channel {} current", channel),
            Quantity::Power { channel } => write!(f, "channel {} power", channel),
            Quantity::Temperature => write!(f, "temperature"),
        }
    }
}

/// Per-channel values derived in one poll cycle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelValues {
    pub corrected_voltage_v: f64,
    pub current_a: f64,
    pub power_w: f64,
}

/// Everything one poll cycle produced that watches can look at
#[derive(Debug, Clone, Default)]
pub struct CycleValues {
    channels: HashMap<u32, ChannelValues>,
    temperature_c: Option<f64>,
}

impl CycleValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_readings(readings: &[SampleReading], temperature_c: Option<f64>) -> Self {
        let channels = readings
            .iter()
            .map(|r| {
                (
                    r.channel_id,
                    ChannelValues {
                        corrected_voltage_v: r.corrected_voltage_v,
                        current_a: r.measurement.current_a,
                        power_w: r.measurement.power_w,
                    },
                )
            })
            .collect();
        Self {
            channels,
            temperature_c,
        }
    }

    pub fn with_channel(mut self, channel: u32, values: ChannelValues) -> Self {
        self.channels.insert(channel, values);
        self
    }

    pub fn with_temperature(mut self, celsius: f64) -> Self {
        self.temperature_c = Some(celsius);
        self
    }

    /// Value of `quantity` this cycle, if it was measured
    pub fn get(&self, quantity: &Quantity) -> Option<f64> {
        match *quantity {
            Quantity::CorrectedVoltage { channel } => {
                self.channels.get(&channel).map(|v| v.corrected_voltage_v)
            }
            Quantity::Current { channel } => self.channels.get(&channel).map(|v| v.current_a),
            Quantity::Power { channel } => self.channels.get(&channel).map(|v| v.power_w),
            Quantity::Temperature => self.temperature_c,
        }
    }
}

/// Tally of polls in which a value was beyond a threshold
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdCounter {
    threshold: f64,
    direction: Direction,
    count: u64,
    last_crossing: Option<DateTime<Utc>>,
}

impl ThresholdCounter {
    pub fn new(threshold: f64, direction: Direction) -> Self {
        Self {
            threshold,
            direction,
            count: 0,
            last_crossing: None,
        }
    }

    /// Count `value` if it is beyond the threshold; returns whether it counted
    pub fn observe(&mut self, value: f64, at: DateTime<Utc>) -> bool {
        if !self.direction.holds(value, self.threshold) {
            return false;
        }
        self.count += 1;
        self.last_crossing = Some(at);
        true
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn last_crossing(&self) -> Option<DateTime<Utc>> {
        self.last_crossing
    }
}

/// Lowest or highest value seen
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtremeTracker {
    kind: ExtremeKind,
    baseline: Option<f64>,
    value: Option<f64>,
    at: Option<DateTime<Utc>>,
}

impl ExtremeTracker {
    pub fn new(kind: ExtremeKind) -> Self {
        Self {
            kind,
            baseline: None,
            value: None,
            at: None,
        }
    }

    /// Start from `baseline`: only values strictly beyond it are recorded
    pub fn with_baseline(mut self, baseline: f64) -> Self {
        self.baseline = Some(baseline);
        self.value = Some(baseline);
        self
    }

    /// Record `value` if it is a new extreme; returns whether it was
    pub fn observe(&mut self, value: f64, at: DateTime<Utc>) -> bool {
        let is_new = match self.value {
            None => true,
            Some(current) => self.kind.beats(value, current),
        };
        if is_new {
            self.value = Some(value);
            self.at = Some(at);
        }
        is_new
    }

    pub fn kind(&self) -> ExtremeKind {
        self.kind
    }

    pub fn baseline(&self) -> Option<f64> {
        self.baseline
    }

    /// Current extreme, or the baseline while nothing has beaten it
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// When the current extreme was observed; `None` while only the baseline is held
    pub fn at(&self) -> Option<DateTime<Utc>> {
        self.at
    }
}

/// One followed quantity and its trackers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Watch {
    name: String,
    quantity: Quantity,
    counter: Option<ThresholdCounter>,
    extreme: Option<ExtremeTracker>,
}

impl Watch {
    pub fn new(name: impl Into<String>, quantity: Quantity) -> Self {
        Self {
            name: name.into(),
            quantity,
            counter: None,
            extreme: None,
        }
    }

    pub fn with_counter(mut self, counter: ThresholdCounter) -> Self {
        self.counter = Some(counter);
        self
    }

    pub fn with_extreme(mut self, extreme: ExtremeTracker) -> Self {
        self.extreme = Some(extreme);
        self
    }

    pub fn from_settings(settings: &WatchSettings) -> Self {
        let mut watch = Watch::new(settings.name.clone(), settings.quantity);
        if let Some(alert) = &settings.alert {
            watch = watch.with_counter(ThresholdCounter::new(alert.threshold, alert.direction));
        }
        if let Some(extreme) = &settings.extreme {
            let mut tracker = ExtremeTracker::new(extreme.kind);
            if let Some(baseline) = extreme.baseline {
                tracker = tracker.with_baseline(baseline);
            }
            watch = watch.with_extreme(tracker);
        }
        watch
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn quantity(&self) -> &Quantity {
        &self.quantity
    }

    pub fn counter(&self) -> Option<&ThresholdCounter> {
        self.counter.as_ref()
    }

    pub fn extreme(&self) -> Option<&ExtremeTracker> {
        self.extreme.as_ref()
    }
}

/// Something notable a poll cycle did to the aggregation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum AggregationEvent {
    ThresholdCrossed {
        watch: String,
        value: f64,
        threshold: f64,
        count: u64,
    },
    NewExtreme {
        watch: String,
        kind: ExtremeKind,
        value: f64,
    },
}

/// Run-level aggregation owned by the monitor
#[derive(Debug, Clone, Serialize)]
pub struct AggregationState {
    started_at: DateTime<Utc>,
    samples: u64,
    flushes: u64,
    watches: Vec<Watch>,
}

impl AggregationState {
    pub fn new(watches: Vec<Watch>, started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            samples: 0,
            flushes: 0,
            watches,
        }
    }

    pub fn from_settings(watches: &[WatchSettings], started_at: DateTime<Utc>) -> Self {
        Self::new(watches.iter().map(Watch::from_settings).collect(), started_at)
    }

    /// Fold one poll cycle into the state
    ///
    /// Watches whose quantity was not measured this cycle are left untouched.
    /// Non-finite values are ignored. The sample counter advances once per
    /// call regardless.
    pub fn observe(&mut self, values: &CycleValues, at: DateTime<Utc>) -> Vec<AggregationEvent> {
        let mut events = Vec::new();

        for watch in &mut self.watches {
            let Some(value) = values.get(&watch.quantity) else {
                continue;
            };
            if !value.is_finite() {
                continue;
            }

            if let Some(counter) = &mut watch.counter {
                if counter.observe(value, at) {
                    events.push(AggregationEvent::ThresholdCrossed {
                        watch: watch.name.clone(),
                        value,
                        threshold: counter.threshold,
                        count: counter.count,
                    });
                }
            }

            if let Some(extreme) = &mut watch.extreme {
                if extreme.observe(value, at) {
                    events.push(AggregationEvent::NewExtreme {
                        watch: watch.name.clone(),
                        kind: extreme.kind,
                        value,
                    });
                }
            }
        }

        self.samples += 1;
        events
    }

    /// Count one persistence flush
    pub fn record_flush(&mut self) {
        self.flushes += 1;
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Poll cycles observed
    pub fn samples(&self) -> u64 {
        self.samples
    }

    /// Persistence flushes performed
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn watches(&self) -> &[Watch] {
        &self.watches
    }

    pub fn watch(&self, name: &str) -> Option<&Watch> {
        self.watches.iter().find(|w| w.name == name)
    }
}

/// Local wall-clock rendering for status lines, `N/A` when unset
pub fn format_local(at: Option<DateTime<Utc>>) -> String {
    match at {
        Some(at) => at
            .with_timezone(&Local)
            .format(display::TIMESTAMP_FORMAT)
            .to_string(),
        None => "N/A".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000, 0).unwrap() + Duration::seconds(secs)
    }

    fn rail(volts: f64) -> CycleValues {
        CycleValues::new().with_channel(
            4,
            ChannelValues {
                corrected_voltage_v: volts,
                current_a: 0.5,
                power_w: 2.5,
            },
        )
    }

    fn rpi_watch() -> Watch {
        Watch::new("RB_Pi", Quantity::CorrectedVoltage { channel: 4 })
            .with_counter(ThresholdCounter::new(4.82, Direction::Below))
            .with_extreme(ExtremeTracker::new(ExtremeKind::Min).with_baseline(5.1))
    }

    #[test]
    fn test_counter_counts_every_poll_below() {
        let mut state = AggregationState::new(vec![rpi_watch()], t(0));
        for (i, v) in [4.9, 4.8, 4.7, 4.85, 4.81].iter().enumerate() {
            state.observe(&rail(*v), t(i as i64 * 2));
        }
        let counter = state.watch("RB_Pi").unwrap().counter().unwrap();
        assert_eq!(counter.count(), 3);
        assert_eq!(counter.last_crossing(), Some(t(8)));
        assert_eq!(state.samples(), 5);
    }

    #[test]
    fn test_counter_is_strict() {
        let mut counter = ThresholdCounter::new(12.40, Direction::Below);
        assert!(!counter.observe(12.40, t(0)));
        assert!(counter.observe(12.39, t(1)));
        assert_eq!(counter.count(), 1);

        let mut above = ThresholdCounter::new(70.0, Direction::Above);
        assert!(!above.observe(70.0, t(0)));
        assert!(above.observe(70.1, t(1)));
    }

    #[test]
    fn test_min_from_baseline_only_records_below_it() {
        let mut state = AggregationState::new(vec![rpi_watch()], t(0));
        state.observe(&rail(5.2), t(1));
        let extreme = state.watch("RB_Pi").unwrap().extreme().unwrap();
        assert_eq!(extreme.value(), Some(5.1));
        assert_eq!(extreme.at(), None);

        state.observe(&rail(5.05), t(2));
        state.observe(&rail(5.07), t(3));
        state.observe(&rail(5.05), t(4));
        let extreme = state.watch("RB_Pi").unwrap().extreme().unwrap();
        assert_eq!(extreme.value(), Some(5.05));
        assert_eq!(extreme.at(), Some(t(2)));
    }

    #[test]
    fn test_max_without_baseline_takes_first_value() {
        let mut tracker = ExtremeTracker::new(ExtremeKind::Max);
        assert!(tracker.observe(35.0, t(0)));
        assert!(!tracker.observe(34.0, t(1)));
        assert!(tracker.observe(52.5, t(2)));
        assert_eq!(tracker.value(), Some(52.5));
        assert_eq!(tracker.at(), Some(t(2)));
    }

    #[test]
    fn test_missing_quantity_leaves_watch_alone() {
        let temp = Watch::new("CPU", Quantity::Temperature)
            .with_extreme(ExtremeTracker::new(ExtremeKind::Max).with_baseline(40.0));
        let mut state = AggregationState::new(vec![rpi_watch(), temp], t(0));

        // channel 4 failed this cycle, no temperature either
        let events = state.observe(&CycleValues::new(), t(1));
        assert!(events.is_empty());
        assert_eq!(state.samples(), 1);
        assert_eq!(state.watch("RB_Pi").unwrap().counter().unwrap().count(), 0);

        let events = state.observe(&CycleValues::new().with_temperature(48.0), t(2));
        assert_eq!(events.len(), 1);
        assert_eq!(state.watch("CPU").unwrap().extreme().unwrap().value(), Some(48.0));
    }

    #[test]
    fn test_non_finite_values_are_ignored() {
        let mut state = AggregationState::new(vec![rpi_watch()], t(0));
        state.observe(&rail(f64::NAN), t(1));
        state.observe(&rail(f64::NEG_INFINITY), t(2));
        let watch = state.watch("RB_Pi").unwrap();
        assert_eq!(watch.counter().unwrap().count(), 0);
        assert_eq!(watch.extreme().unwrap().value(), Some(5.1));
    }

    #[test]
    fn test_events_report_crossings_and_extremes() {
        let mut state = AggregationState::new(vec![rpi_watch()], t(0));
        let events = state.observe(&rail(4.7), t(1));
        assert_eq!(
            events,
            vec![
                AggregationEvent::ThresholdCrossed {
                    watch: "RB_Pi".into(),
                    value: 4.7,
                    threshold: 4.82,
                    count: 1,
                },
                AggregationEvent::NewExtreme {
                    watch: "RB_Pi".into(),
                    kind: ExtremeKind::Min,
                    value: 4.7,
                },
            ]
        );
    }

    #[test]
    fn test_other_channel_quantities() {
        let values = rail(5.0);
        assert_eq!(values.get(&Quantity::Current { channel: 4 }), Some(0.5));
        assert_eq!(values.get(&Quantity::Power { channel: 4 }), Some(2.5));
        assert_eq!(values.get(&Quantity::Power { channel: 1 }), None);
    }

    #[test]
    fn test_flush_counter() {
        let mut state = AggregationState::new(Vec::new(), t(0));
        state.record_flush();
        state.record_flush();
        assert_eq!(state.flushes(), 2);
        assert_eq!(state.started_at(), t(0));
    }

    #[test]
    fn test_format_local_unset() {
        assert_eq!(format_local(None), "N/A");
        assert_eq!(format_local(Some(t(0))).len(), "19/10/2026, 12:00:00".len());
    }

    #[test]
    fn test_quantity_serde_shape() {
        let q: Quantity =
            serde_json::from_str(r#"{"kind":"corrected_voltage","channel":2}"#).unwrap();
        assert_eq!(q, Quantity::CorrectedVoltage { channel: 2 });
        let t: Quantity = serde_json::from_str(r#"{"kind":"temperature"}"#).unwrap();
        assert_eq!(t, Quantity::Temperature);
    }
}

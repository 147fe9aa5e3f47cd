//! Sampling loop
//!
//! Runs [`Monitor::poll_cycle`] on the blocking pool once per poll interval.
//! Each cycle is bounded by the cycle timeout; a cycle that overruns is
//! reported and the next one is attempted on schedule. The sleep between
//! cycles is the only point where shutdown is observed, so a cycle that has
//! started always finishes its persistence flush.
//!
//! The timeout bounds the wait, not the bus transfer itself: a blocking I2C
//! call cannot be preempted, so a wedged transfer keeps the monitor locked
//! and later cycles time out waiting for it. A cycle that only obtains the
//! monitor after its deadline is abandoned instead of running unobserved.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use inamon_core::constants::timing::MAX_CONSECUTIVE_ERRORS;
use inamon_core::{format_local, AggregationState, CycleReport, Monitor, RegisterTransport, SampleSink};
use inamon_error::{InamonError, Result};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Monitor shared between the loop and its blocking cycles
pub type SharedMonitor<B, S> = Arc<Mutex<Monitor<B, S>>>;

/// Cooperative shutdown signal
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown; safe to call from a signal handler thread
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Loop timing
#[derive(Debug, Clone, Copy)]
pub struct SamplingConfig {
    pub poll_interval: Duration,
    pub cycle_timeout: Duration,
}

/// Counters returned when the loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub timeouts: u64,
    /// Cycles that failed with an error outside the per-cycle classes
    pub unrecoverable: u64,
}

/// Poll until `shutdown` is triggered
pub async fn run_sampling_loop<B, S>(
    monitor: SharedMonitor<B, S>,
    config: SamplingConfig,
    shutdown: Shutdown,
) -> LoopStats
where
    B: RegisterTransport + Send + 'static,
    S: SampleSink + Send + 'static,
{
    info!(
        poll_ms = config.poll_interval.as_millis() as u64,
        timeout_ms = config.cycle_timeout.as_millis() as u64,
        "Sampling loop starting"
    );

    let mut stats = LoopStats::default();
    let mut consecutive_errors: u32 = 0;

    loop {
        if shutdown.is_triggered() {
            info!("Sampling loop shutting down");
            break;
        }

        stats.cycles += 1;
        match run_cycle(&monitor, config.cycle_timeout).await {
            Ok(report) => {
                log_readings(&report);
                if report.failures.is_empty() {
                    if consecutive_errors > 0 {
                        debug!("Sampling recovered after {} failed cycles", consecutive_errors);
                        consecutive_errors = 0;
                    }
                } else {
                    stats.failed_cycles += 1;
                    consecutive_errors += 1;
                    if consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                        warn!(
                            failing = report.failures.len(),
                            cycles = consecutive_errors,
                            "Channels have been failing for consecutive cycles"
                        );
                    }
                }
            }
            Err(e) => {
                stats.failed_cycles += 1;
                if matches!(e, InamonError::Timeout(_)) {
                    stats.timeouts += 1;
                }
                consecutive_errors += 1;
                if !e.is_recoverable() {
                    stats.unrecoverable += 1;
                    error!("Poll cycle failed with unrecoverable error: {}", e);
                } else if consecutive_errors == 1 || consecutive_errors % MAX_CONSECUTIVE_ERRORS == 0 {
                    warn!("Poll cycle failed (count: {}): {}", consecutive_errors, e);
                }
            }
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            _ = shutdown.notify.notified() => {
                debug!("Sampling loop woken by shutdown signal");
            }
        }
    }

    info!(
        cycles = stats.cycles,
        failed = stats.failed_cycles,
        timeouts = stats.timeouts,
        unrecoverable = stats.unrecoverable,
        "Sampling loop stopped"
    );
    stats
}

/// One poll cycle on the blocking pool, bounded by `cycle_timeout`
async fn run_cycle<B, S>(monitor: &SharedMonitor<B, S>, cycle_timeout: Duration) -> Result<CycleReport>
where
    B: RegisterTransport + Send + 'static,
    S: SampleSink + Send + 'static,
{
    let monitor = Arc::clone(monitor);
    let deadline = Instant::now() + cycle_timeout;
    let task = tokio::task::spawn_blocking(move || -> Result<CycleReport> {
        // an overrunning cycle may still hold the monitor
        let mut guard = monitor.try_lock_until(deadline).ok_or_else(|| {
            InamonError::Timeout("previous poll cycle still running".to_string())
        })?;
        if Instant::now() >= deadline {
            return Err(InamonError::Timeout(
                "monitor became free after the cycle deadline".to_string(),
            ));
        }
        let report = guard.poll_cycle(Utc::now());
        if report.flushed {
            log_summary(guard.state());
        }
        Ok(report)
    });

    match tokio::time::timeout(cycle_timeout, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(InamonError::generic(format!(
            "poll cycle aborted: {}",
            join_error
        ))),
        Err(_) => Err(InamonError::Timeout(format!(
            "poll cycle exceeded {} ms",
            cycle_timeout.as_millis()
        ))),
    }
}

fn log_readings(report: &CycleReport) {
    for reading in &report.readings {
        debug!(
            channel = reading.channel_id,
            name = %reading.channel_name,
            bus_v = reading.measurement.bus.volts,
            shunt_v = reading.measurement.shunt_voltage_v,
            current_a = reading.measurement.current_a,
            power_w = reading.measurement.power_w,
            corrected_v = reading.corrected_voltage_v,
            "Sample"
        );
    }
    if let Some(celsius) = report.temperature_c {
        debug!(celsius, "Temperature");
    }
    if report.flushed {
        debug!(
            persisted = report.persisted,
            errors = report.persist_errors,
            "Flushed samples"
        );
    }
}

/// Run counters and every watch, logged at each flush
pub fn log_summary(state: &AggregationState) {
    info!(
        running_since = %format_local(Some(state.started_at())),
        samples = state.samples(),
        flushes = state.flushes(),
        "Sampling summary"
    );

    for watch in state.watches() {
        if let Some(counter) = watch.counter() {
            info!(
                watch = %watch.name(),
                quantity = %watch.quantity(),
                threshold = counter.threshold(),
                count = counter.count(),
                last = %format_local(counter.last_crossing()),
                "Threshold counter"
            );
        }
        if let Some(extreme) = watch.extreme() {
            info!(
                watch = %watch.name(),
                quantity = %watch.quantity(),
                kind = %extreme.kind(),
                value = ?extreme.value(),
                at = %format_local(extreme.at()),
                "Extreme"
            );
        }
    }
}

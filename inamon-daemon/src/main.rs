//! Inamon Daemon (inamond)
//!
//! Samples every configured INA219 on a fixed cadence, tracks threshold
//! crossings and extremes, and writes samples to SQLite at a capped rate.
//!
//! # Startup
//! - Settings: `--config PATH`, else `INAMON_CONFIG`, else
//!   `/etc/inamon/settings.json`; a missing file means built-in defaults
//! - Invalid settings or calibration stop the daemon before any device is
//!   touched
//! - Devices that do not answer at startup are retried every cycle
//!
//! # Logging
//! - systemd journal when available, stdout otherwise
//! - Level from `INAMON_LOG` (default `info`)
//!
//! # Shutdown
//! SIGINT/SIGTERM end the loop at its next sleep. A poll cycle stuck in a bus
//! transfer is given `SHUTDOWN_GRACE` before the process exits without it.

mod sampling;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use inamon_core::constants::paths;
use inamon_core::{
    format_local, load_settings, FixedTemperature, LinuxI2cTransport, MemorySink, Monitor,
    MonitorSettings, RegisterTransport, SampleSink, SharedBus, SimulatedBus, SqliteSink,
    ThermalZone,
};
use parking_lot::Mutex;
use tracing::{error, info, warn};

use sampling::{run_sampling_loop, SamplingConfig, Shutdown};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Rail presented by every simulated device
const SIM_BUS_VOLTS: f64 = 12.6;
const SIM_SHUNT_VOLTS: f64 = 0.004;
const SIM_TEMPERATURE_C: f64 = 45.0;

/// How long exit waits for a blocking poll cycle that is still running
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

fn print_help() {
    println!("inamond {} - INA219 power monitoring daemon", VERSION);
    println!();
    println!("USAGE:");
    println!("    inamond [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>  Settings file (default: $INAMON_CONFIG or /etc/inamon/settings.json)");
    println!("        --simulate       Run against simulated devices and keep samples in memory");
    println!("        --check          Validate settings and exit");
    println!("    -h, --help           Print help");
    println!("    -v, --version        Print version");
    println!();
    println!("ENVIRONMENT:");
    println!("    INAMON_LOG           Log filter (default: info)");
    println!("    INAMON_CONFIG        Settings file path");
}

#[derive(Debug, Default)]
struct Args {
    config: Option<PathBuf>,
    simulate: bool,
    check: bool,
}

/// Parse arguments; `Ok(None)` means help or version was printed
fn parse_args() -> anyhow::Result<Option<Args>> {
    let argv: Vec<String> = std::env::args().collect();
    let mut args = Args::default();

    let mut i = 1;
    while i < argv.len() {
        match argv[i].as_str() {
            "-h" | "--help" => {
                print_help();
                return Ok(None);
            }
            "-v" | "--version" => {
                println!("inamond {}", VERSION);
                return Ok(None);
            }
            "-c" | "--config" => {
                i += 1;
                let path = argv
                    .get(i)
                    .context("--config requires a path argument")?;
                args.config = Some(PathBuf::from(path));
            }
            "--simulate" => args.simulate = true,
            "--check" => args.check = true,
            arg => {
                print_help();
                anyhow::bail!("unknown argument: {}", arg);
            }
        }
        i += 1;
    }

    Ok(Some(args))
}

fn init_logging() -> bool {
    let log_level = std::env::var("INAMON_LOG").unwrap_or_else(|_| "info".to_string());
    let use_journald = Path::new("/run/systemd/journal/socket").exists();

    if use_journald {
        match tracing_journald::layer() {
            Ok(journald_layer) => {
                use tracing_subscriber::prelude::*;
                tracing_subscriber::registry()
                    .with(journald_layer)
                    .with(tracing_subscriber::EnvFilter::new(&log_level))
                    .init();
                return true;
            }
            Err(e) => {
                eprintln!("Failed to create journald layer: {}, falling back to stdout", e);
            }
        }
    }

    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_env_filter(&log_level)
        .init();
    false
}

fn main() -> anyhow::Result<()> {
    let Some(args) = parse_args()? else {
        return Ok(());
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;
    let result = runtime.block_on(daemon(args));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

async fn daemon(args: Args) -> anyhow::Result<()> {
    let journald = init_logging();
    info!("STARTUP: inamond {} starting", VERSION);
    info!("STARTUP: Logging to {}", if journald { "systemd journal" } else { "stdout" });

    let settings_path = paths::settings_path(args.config.as_deref());
    let settings = match load_settings(&settings_path).and_then(|s| s.validate().map(|()| s)) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Invalid settings in {:?}: {}", settings_path, e);
            std::process::exit(1);
        }
    };
    info!(
        "STARTUP: {} channels, poll every {} ms, persist every {} s",
        settings.channels.len(),
        settings.general.poll_interval_ms,
        settings.general.persist_interval_secs
    );

    if args.check {
        info!("Settings are valid");
        return Ok(());
    }

    let shutdown = Shutdown::new();
    let handler_shutdown = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("SIGNAL: Received SIGINT/SIGTERM - finishing current cycle");
        handler_shutdown.trigger();
    }) {
        warn!("Failed to set signal handler: {}. Shutdown via signals may not work cleanly.", e);
    }

    if args.simulate {
        info!("STARTUP: Simulation mode, samples are kept in memory");
        let mut sim = SimulatedBus::new();
        for channel in &settings.channels {
            sim.set_rail(channel.address, SIM_BUS_VOLTS, SIM_SHUNT_VOLTS);
        }
        let bus = SharedBus::new(sim);
        let monitor = Monitor::from_settings(&settings, bus.clone(), MemorySink::new(), Utc::now())?;
        let monitor = if settings.temperature.enabled {
            monitor.with_temperature_source(Box::new(FixedTemperature(SIM_TEMPERATURE_C)))
        } else {
            monitor
        };
        run(monitor, &settings, shutdown).await;
        info!(
            writes = bus.with(|b| b.writes().len()),
            "SHUTDOWN: Simulated bus register writes"
        );
    } else {
        let bus = LinuxI2cTransport::open(Path::new(&settings.general.bus_path))
            .with_context(|| format!("opening I2C bus {}", settings.general.bus_path))?;
        let sink = SqliteSink::open(
            Path::new(&settings.storage.database_path),
            &settings.storage.table,
        )
        .context("opening sample store")?;
        let monitor = Monitor::from_settings(&settings, SharedBus::new(bus), sink, Utc::now())?;
        let monitor = if settings.temperature.enabled {
            monitor.with_temperature_source(Box::new(ThermalZone::new(&settings.temperature.path)))
        } else {
            monitor
        };
        run(monitor, &settings, shutdown).await;
    }

    info!("SHUTDOWN: inamond stopped");
    Ok(())
}

async fn run<B, S>(mut monitor: Monitor<B, S>, settings: &MonitorSettings, shutdown: Shutdown)
where
    B: RegisterTransport + Send + 'static,
    S: SampleSink + Send + 'static,
{
    for channel in monitor.channels() {
        let channel_settings = channel.settings();
        let calibration = channel.driver().calibration();
        info!(
            channel = channel_settings.id,
            name = %channel_settings.name,
            address = format_args!("0x{:02X}", channel_settings.address),
            calibration = calibration.calibration_register,
            current_lsb_a = calibration.scale.current_lsb_a,
            max_current_a = calibration.limits.max_current_a,
            "STARTUP: Channel configured"
        );
    }

    let failures = monitor.initialize();
    if !failures.is_empty() {
        warn!(
            "STARTUP: {} of {} channels did not respond, retrying each cycle",
            failures.len(),
            settings.channels.len()
        );
    }

    let config = SamplingConfig {
        poll_interval: settings.poll_interval(),
        cycle_timeout: settings.cycle_timeout(),
    };
    let monitor = Arc::new(Mutex::new(monitor));
    run_sampling_loop(Arc::clone(&monitor), config, shutdown).await;

    match monitor.try_lock_for(config.cycle_timeout) {
        Some(guard) => {
            let status = guard.status();
            info!(
                running_since = %format_local(Some(status.running_since)),
                samples = status.samples,
                flushes = status.flushes,
                last_flush = %format_local(status.last_flush),
                persist_interval_secs = status.persist_interval_secs,
                needing_init = ?status.channels_needing_init,
                "SHUTDOWN: Final status"
            );
        }
        None => warn!("SHUTDOWN: Poll cycle still running, final status unavailable"),
    };
}

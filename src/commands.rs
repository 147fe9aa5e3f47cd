/*
 * This file is part of Inamon.
 *
 * Copyright (C) 2025 Inamon contributors
 *
 * Inamon is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * Inamon is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with Inamon. If not, see <https://www.gnu.org/licenses/>.
 */

//! Operator commands
//!
//! Each command returns a serializable value; `main` prints it as JSON.

use std::path::Path;

use inamon_core::{
    compute_calibration, load_settings, save_settings, Calibration, CalibrationConfig,
    MonitorSettings, SampleRecord, SqliteSink,
};
use inamon_error::{InamonError, Result};
use serde::Serialize;

/// Derived calibration of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelCalibration {
    pub channel_id: u32,
    pub name: String,
    pub address: String,
    pub inputs: CalibrationConfig,
    pub calibration: Calibration,
}

/// Calibration register, configuration register, scale factors and overflow
/// limits for every configured channel
pub fn calibrate(settings: &MonitorSettings) -> Result<Vec<ChannelCalibration>> {
    settings
        .channels
        .iter()
        .map(|channel| {
            let inputs = *settings.channel_calibration(channel);
            let calibration = compute_calibration(&inputs).map_err(|e| {
                InamonError::invalid_calibration(format!("channel {}: {}", channel.name, e))
            })?;
            Ok(ChannelCalibration {
                channel_id: channel.id,
                name: channel.name.clone(),
                address: format!("0x{:02X}", channel.address),
                inputs,
                calibration,
            })
        })
        .collect()
}

/// Outcome of validating a settings file
#[derive(Debug, Clone, Serialize)]
pub struct CheckSummary {
    pub path: String,
    /// False when the file is missing and built-in defaults were checked
    pub from_file: bool,
    pub channels: usize,
    pub watches: usize,
    pub poll_interval_ms: u64,
    pub persist_interval_secs: u64,
    pub database: String,
    pub table: String,
}

/// Load and validate the settings at `path`
pub fn check(path: &Path) -> Result<CheckSummary> {
    let settings = load_settings(path)?;
    settings.validate()?;

    Ok(CheckSummary {
        path: path.display().to_string(),
        from_file: path.exists(),
        channels: settings.channels.len(),
        watches: settings.watches.len(),
        poll_interval_ms: settings.general.poll_interval_ms,
        persist_interval_secs: settings.general.persist_interval_secs,
        database: settings.storage.database_path.clone(),
        table: settings.storage.table.clone(),
    })
}

/// Write the default settings to `path`
pub fn init(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        return Err(InamonError::config(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    save_settings(path, &MonitorSettings::default())
}

/// Most recent persisted samples, newest first
pub fn recent(settings: &MonitorSettings, limit: usize) -> Result<Vec<SampleRecord>> {
    let path = Path::new(&settings.storage.database_path);
    if !path.exists() {
        return Err(InamonError::config(format!(
            "no sample database at {}",
            path.display()
        )));
    }
    let store = SqliteSink::open(path, &settings.storage.table)?;
    store.recent(limit)
}

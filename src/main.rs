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

use std::path::PathBuf;

use anyhow::Context;
use inamon::commands;
use inamon_core::constants::paths;
use inamon_core::load_settings;
use serde::Serialize;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DEFAULT_RECENT_LIMIT: usize = 20;

fn print_help() {
    println!("inamon {} - INA219 power monitoring tools", VERSION);
    println!();
    println!("USAGE:");
    println!("    inamon <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    calibrate   Print derived calibration for every channel");
    println!("    check       Validate the settings file");
    println!("    init        Write default settings");
    println!("    recent      Print the most recent persisted samples");
    println!();
    println!("OPTIONS:");
    println!("    -c, --config <PATH>  Settings file (default: $INAMON_CONFIG or /etc/inamon/settings.json)");
    println!("    -n, --limit <N>      Rows for `recent` (default: {})", DEFAULT_RECENT_LIMIT);
    println!("        --force          Let `init` overwrite an existing file");
    println!("    -h, --help           Print help");
    println!("    -v, --version        Print version");
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args: Vec<String> = std::env::args().collect();

    let mut command: Option<String> = None;
    let mut config: Option<PathBuf> = None;
    let mut limit = DEFAULT_RECENT_LIMIT;
    let mut force = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" | "help" => {
                print_help();
                return Ok(());
            }
            "-v" | "--version" => {
                println!("inamon {}", VERSION);
                return Ok(());
            }
            "-c" | "--config" => {
                i += 1;
                let path = args.get(i).context("--config requires a path argument")?;
                config = Some(PathBuf::from(path));
            }
            "-n" | "--limit" => {
                i += 1;
                let value = args.get(i).context("--limit requires a number")?;
                limit = value
                    .parse()
                    .with_context(|| format!("invalid --limit value: {}", value))?;
            }
            "--force" => force = true,
            arg if command.is_none() && !arg.starts_with('-') => command = Some(arg.to_string()),
            arg => {
                print_help();
                anyhow::bail!("unknown argument: {}", arg);
            }
        }
        i += 1;
    }

    let path = paths::settings_path(config.as_deref());

    match command.as_deref() {
        Some("calibrate") => {
            let settings = load_settings(&path)?;
            print_json(&commands::calibrate(&settings)?)
        }
        Some("check") => print_json(&commands::check(&path)?),
        Some("init") => {
            commands::init(&path, force)?;
            println!("Wrote default settings to {}", path.display());
            Ok(())
        }
        Some("recent") => {
            let settings = load_settings(&path)?;
            settings.validate()?;
            print_json(&commands::recent(&settings, limit)?)
        }
        Some(other) => {
            print_help();
            anyhow::bail!("unknown command: {}", other)
        }
        None => {
            print_help();
            std::process::exit(1);
        }
    }
}

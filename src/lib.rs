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

//! Inamon - operator tools for INA219 power monitoring
//!
//! Inspect derived calibration, validate or create settings files, and read
//! back recent samples. The sampling itself runs in `inamond`.

pub mod commands;

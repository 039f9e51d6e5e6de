// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use duration_string::DurationString;
use serde::Deserialize;

use crate::{
    device::{DEFAULT_CLIENT_NAME, DEFAULT_SERVER_ADDRESS},
    player::DEFAULT_SCAN_WINDOW,
    scheduler::DEFAULT_TICK_INTERVAL,
};

use super::ConfigError;

/// The configuration for the pattern player.
#[derive(Deserialize, Clone, Debug)]
pub struct Player {
    /// The address of the device server.
    server_address: Option<String>,
    /// The name announced to the device server.
    client_name: Option<String>,
    /// The time between playback ticks.
    tick_interval: Option<String>,
    /// How long each scan looks for devices.
    scan_window: Option<String>,
    /// The pattern to play. Relative paths are relative to the config file.
    pattern: String,
}

impl Player {
    /// Returns the device server address.
    pub fn server_address(&self) -> &str {
        self.server_address
            .as_deref()
            .unwrap_or(DEFAULT_SERVER_ADDRESS)
    }

    /// Returns the client name.
    pub fn client_name(&self) -> &str {
        self.client_name.as_deref().unwrap_or(DEFAULT_CLIENT_NAME)
    }

    /// Returns the tick interval.
    pub fn tick_interval(&self) -> Result<Duration, ConfigError> {
        parse_duration("tick_interval", &self.tick_interval, DEFAULT_TICK_INTERVAL)
    }

    /// Returns the scan window.
    pub fn scan_window(&self) -> Result<Duration, ConfigError> {
        parse_duration("scan_window", &self.scan_window, DEFAULT_SCAN_WINDOW)
    }

    /// Returns the pattern path, resolved against the directory the config was loaded from.
    pub fn pattern_path(&self, config_dir: &Path) -> PathBuf {
        config_dir.join(&self.pattern)
    }
}

fn parse_duration(
    field: &'static str,
    value: &Option<String>,
    default: Duration,
) -> Result<Duration, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };

    let duration: Duration = DurationString::from_string(value.clone())
        .map_err(|e| ConfigError::InvalidDuration {
            field,
            value: value.clone(),
            message: e.to_string(),
        })?
        .into();
    if duration.is_zero() {
        return Err(ConfigError::InvalidDuration {
            field,
            value: value.clone(),
            message: "must be greater than zero".to_string(),
        });
    }
    Ok(duration)
}

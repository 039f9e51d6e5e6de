// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
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

//! Typed errors for the playback engine so callers can render a message for each failure
//! without string matching.

/// Errors raised by a transport (the connection to a device server).
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("not connected to a device server")]
    NotConnected,
    #[error("connection to the device server closed")]
    Closed,
    #[error("device server rejected request (code {code}): {message}")]
    Rejected { code: u32, message: String },
    #[error("unexpected response from device server: {0}")]
    Protocol(String),
    #[error("device server did not answer within {0:?}")]
    TimedOut(std::time::Duration),
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported server address {0}")]
    UnsupportedAddress(String),
    #[error("websocket error: {0}")]
    Websocket(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("mock transport failure: {0}")]
    Mock(String),
}

/// Errors raised by a single device.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("device has no vibration actuator")]
    Unsupported,
    #[error("device rejected command: {0}")]
    Rejected(String),
    #[error("device did not respond within {0:?}")]
    TimedOut(std::time::Duration),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// The transport failed to connect. The connection state has reverted to disconnected and the
/// caller may retry.
#[derive(Debug, thiserror::Error)]
#[error("unable to connect to {address}: {source}")]
pub struct ConnectionError {
    pub address: String,
    #[source]
    pub source: TransportError,
}

/// An operation that needs a live connection was attempted while disconnected.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("not connected to a device server")]
pub struct NotConnectedError;

/// Scanning for devices failed.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),
    #[error("scan failed: {0}")]
    Transport(#[from] TransportError),
}

/// A pattern failed structural validation.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum PatternError {
    #[error("pattern duration must be a positive number of milliseconds, got {0}")]
    InvalidDuration(f64),
    #[error("pattern has no tracks")]
    NoTracks,
    #[error("track {track} point {point} has an invalid time or intensity")]
    InvalidPoint { track: usize, point: usize },
}

/// Playback could not be started. No timer is running when this is returned.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),
    #[error("no devices are connected")]
    NoDevices,
    #[error("pattern needs at least one track with two or more points")]
    InsufficientPoints,
    #[error("invalid pattern: {0}")]
    InvalidPattern(#[from] PatternError),
    #[error("tick interval must be greater than zero")]
    ZeroTickInterval,
}

/// A single device rejected a command during playback. These are logged and never abort a
/// playback session.
#[derive(Debug, thiserror::Error)]
#[error("device {index} ({device}) rejected command: {source}")]
pub struct DeviceDispatchError {
    pub index: usize,
    pub device: String,
    #[source]
    pub source: DeviceError,
}

/// A direct vibration request failed.
#[derive(Debug, thiserror::Error)]
pub enum VibrationError {
    #[error(transparent)]
    NotConnected(#[from] NotConnectedError),
    #[error("no device at index {0}")]
    NoSuchDevice(usize),
    #[error(transparent)]
    Dispatch(#[from] DeviceDispatchError),
}

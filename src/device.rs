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
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use tokio::sync::mpsc::Receiver;

use crate::error::{DeviceError, TransportError};

#[cfg(feature = "websocket")]
pub mod buttplug;
pub mod mock;

/// The default device server address.
pub const DEFAULT_SERVER_ADDRESS: &str = "ws://127.0.0.1:12345";

/// The default name to announce to the device server.
pub const DEFAULT_CLIENT_NAME: &str = "VibeCanvas";

/// A connected device with one or more motors.
#[async_trait]
pub trait Device: fmt::Display + Send + Sync {
    /// Returns the server assigned index of the device.
    fn index(&self) -> u32;

    /// Returns the name of the device.
    fn name(&self) -> String;

    /// Returns true if the device has at least one vibration actuator.
    fn has_vibration(&self) -> bool;

    /// Sets every vibration actuator on the device to the given speed, from 0 to 1.
    async fn vibrate(&self, speed: f64) -> Result<(), DeviceError>;

    /// Stops all actuators on the device.
    async fn stop(&self) -> Result<(), DeviceError>;
}

/// Events pushed by a transport while it is connected.
#[derive(Clone)]
pub enum TransportEvent {
    /// A device became available.
    DeviceAdded(Arc<dyn Device>),
    /// The device with the given server index went away.
    DeviceRemoved(u32),
    /// The session with the device server ended.
    Disconnected,
}

impl fmt::Debug for TransportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportEvent::DeviceAdded(device) => write!(f, "DeviceAdded({})", device),
            TransportEvent::DeviceRemoved(index) => write!(f, "DeviceRemoved({})", index),
            TransportEvent::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// A connection to a device server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Connects to the server at the given address. The returned receiver yields events until the
    /// session ends, after which it is closed.
    async fn connect(&self, address: &str) -> Result<Receiver<TransportEvent>, TransportError>;

    /// Tears down the session.
    async fn disconnect(&self) -> Result<(), TransportError>;

    /// Asks the server to begin looking for devices.
    async fn start_scanning(&self) -> Result<(), TransportError>;

    /// Asks the server to stop looking for devices.
    async fn stop_scanning(&self) -> Result<(), TransportError>;

    /// Returns the devices the server currently knows about, ordered by index.
    async fn devices(&self) -> Result<Vec<Arc<dyn Device>>, TransportError>;
}

/// A plain snapshot of a device, handed to subscribers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub index: u32,
    pub name: String,
    pub has_vibration: bool,
}

impl DeviceInfo {
    pub fn from_device(device: &dyn Device) -> DeviceInfo {
        DeviceInfo {
            index: device.index(),
            name: device.name(),
            has_vibration: device.has_vibration(),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (index {}", self.name, self.index)?;
        if !self.has_vibration {
            write!(f, ", no vibration")?;
        }
        write!(f, ")")
    }
}

/// Gets a transport for the given server address.
pub fn get_transport(
    address: &str,
    client_name: &str,
) -> Result<Arc<dyn Transport>, TransportError> {
    if address.starts_with("mock") {
        return Ok(Arc::new(mock::Transport::get(address)));
    }

    websocket_transport(address, client_name)
}

#[cfg(feature = "websocket")]
fn websocket_transport(
    address: &str,
    client_name: &str,
) -> Result<Arc<dyn Transport>, TransportError> {
    // Plain websockets only. The client is built without TLS.
    if address.starts_with("ws://") {
        return Ok(Arc::new(buttplug::Client::new(client_name)));
    }
    Err(TransportError::UnsupportedAddress(address.to_string()))
}

#[cfg(not(feature = "websocket"))]
fn websocket_transport(
    address: &str,
    _client_name: &str,
) -> Result<Arc<dyn Transport>, TransportError> {
    Err(TransportError::UnsupportedAddress(address.to_string()))
}

#[cfg(test)]
pub mod test {
    pub use super::mock::{Device, Transport};
}

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

use tokio::sync::mpsc::Receiver;
use tracing::{info, warn};

use crate::{
    device::{Device, DeviceInfo, Transport, TransportEvent},
    error::{ConnectionError, NotConnectedError, ScanError},
};

/// The lifecycle of a connection to the device server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Scanning,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Scanning => "scanning",
        };
        write!(f, "{}", state)
    }
}

/// Called with the current device list whenever it changes.
pub type DevicesCallback = Box<dyn Fn(&[DeviceInfo]) + Send + Sync>;

/// Called with the current state whenever it changes.
pub type StateCallback = Box<dyn Fn(ConnectionState) + Send + Sync>;

/// What a transport event did to the connection.
#[derive(Debug, PartialEq, Eq)]
pub enum Transition {
    /// The event was stale or changed nothing.
    Ignored,
    /// The device list changed.
    DevicesChanged,
    /// The session ended. Anything still driving devices must stop.
    Disconnected,
}

/// A newly established session. Events must be fed back through [`Connection::handle_event`]
/// along with the generation.
pub struct Session {
    pub generation: u64,
    pub events: Receiver<TransportEvent>,
}

/// Owns the connection state and the device set for a device server.
///
/// Devices are kept in arrival order. A removed device closes the gap, so every later device moves
/// down one position.
pub struct Connection {
    transport: Arc<dyn Transport>,
    address: String,
    state: ConnectionState,
    devices: Vec<Arc<dyn Device>>,
    /// Incremented on every connect and disconnect so events from an old session are ignored.
    generation: u64,
    devices_callbacks: Vec<DevicesCallback>,
    state_callbacks: Vec<StateCallback>,
}

impl Connection {
    /// Creates a new, disconnected connection.
    pub fn new(transport: Arc<dyn Transport>, address: &str) -> Connection {
        Connection {
            transport,
            address: address.to_string(),
            state: ConnectionState::Disconnected,
            devices: Vec::new(),
            generation: 0,
            devices_callbacks: Vec::new(),
            state_callbacks: Vec::new(),
        }
    }

    /// Returns the server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true if the session is live, scanning or not.
    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Scanning
        )
    }

    /// Returns an error unless the session is live.
    pub fn require_connected(&self) -> Result<(), NotConnectedError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(NotConnectedError)
        }
    }

    /// Returns the current device set.
    pub fn devices(&self) -> &[Arc<dyn Device>] {
        &self.devices
    }

    /// Returns a plain snapshot of the device set.
    pub fn device_infos(&self) -> Vec<DeviceInfo> {
        self.devices
            .iter()
            .map(|device| DeviceInfo::from_device(device.as_ref()))
            .collect()
    }

    /// Returns the current session generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Registers a callback for device list changes.
    pub fn on_devices_changed(&mut self, callback: DevicesCallback) {
        self.devices_callbacks.push(callback);
    }

    /// Registers a callback for state changes.
    pub fn on_state_changed(&mut self, callback: StateCallback) {
        self.state_callbacks.push(callback);
    }

    /// Connects to the device server. Returns None if the session was already live.
    pub async fn connect(&mut self) -> Result<Option<Session>, ConnectionError> {
        if self.is_connected() {
            info!(address = self.address, "Already connected.");
            return Ok(None);
        }

        self.set_state(ConnectionState::Connecting);
        let events = match self.transport.connect(&self.address).await {
            Ok(events) => events,
            Err(e) => {
                warn!(address = self.address, err = %e, "Unable to connect.");
                self.set_state(ConnectionState::Disconnected);
                return Err(ConnectionError {
                    address: self.address.clone(),
                    source: e,
                });
            }
        };

        let devices = match self.transport.devices().await {
            Ok(devices) => devices,
            Err(e) => {
                warn!(address = self.address, err = %e, "Unable to list devices.");
                if let Err(e) = self.transport.disconnect().await {
                    warn!(err = %e, "Error tearing down failed session.");
                }
                self.set_state(ConnectionState::Disconnected);
                return Err(ConnectionError {
                    address: self.address.clone(),
                    source: e,
                });
            }
        };

        self.generation += 1;
        self.set_devices(devices);
        self.set_state(ConnectionState::Connected);
        info!(
            address = self.address,
            devices = self.devices.len(),
            "Connected."
        );

        Ok(Some(Session {
            generation: self.generation,
            events,
        }))
    }

    /// Starts the discovery window. Returns the session generation the scan belongs to.
    pub async fn begin_scan(&mut self) -> Result<u64, ScanError> {
        if self.state != ConnectionState::Connected {
            return Err(NotConnectedError.into());
        }

        self.set_state(ConnectionState::Scanning);
        if let Err(e) = self.transport.start_scanning().await {
            self.set_state(ConnectionState::Connected);
            return Err(e.into());
        }
        info!("Scanning for devices.");
        Ok(self.generation)
    }

    /// Ends the discovery window started in the given generation and refreshes the device set.
    /// Does nothing if that session ended while scanning, even if a newer one is scanning now.
    pub async fn finish_scan(&mut self, generation: u64) -> Result<(), ScanError> {
        if generation != self.generation || self.state != ConnectionState::Scanning {
            info!(state = %self.state, "Scan window ended after the session changed.");
            return Ok(());
        }

        let stopped = self.transport.stop_scanning().await;
        match self.transport.devices().await {
            Ok(devices) => self.merge_devices(devices),
            Err(e) => warn!(err = %e, "Unable to refresh devices after scanning."),
        }
        self.set_state(ConnectionState::Connected);
        info!(devices = self.devices.len(), "Finished scanning.");

        stopped.map_err(ScanError::from)
    }

    /// Applies a transport event. Events from an earlier session are ignored.
    pub fn handle_event(&mut self, generation: u64, event: TransportEvent) -> Transition {
        if generation != self.generation || !self.is_connected() {
            return Transition::Ignored;
        }

        match event {
            TransportEvent::DeviceAdded(device) => {
                let mut devices = self.devices.clone();
                match devices
                    .iter()
                    .position(|existing| existing.index() == device.index())
                {
                    Some(position) => devices[position] = device,
                    None => devices.push(device),
                }
                self.set_devices(devices);
                Transition::DevicesChanged
            }
            TransportEvent::DeviceRemoved(index) => {
                let mut devices = self.devices.clone();
                devices.retain(|device| device.index() != index);
                if devices.len() == self.devices.len() {
                    return Transition::Ignored;
                }
                self.set_devices(devices);
                Transition::DevicesChanged
            }
            TransportEvent::Disconnected => {
                warn!(address = self.address, "Device server closed the session.");
                self.teardown();
                Transition::Disconnected
            }
        }
    }

    /// Tears down the session. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) {
        if self.state != ConnectionState::Disconnected {
            if let Err(e) = self.transport.disconnect().await {
                warn!(err = %e, "Error disconnecting from device server.");
            }
            info!(address = self.address, "Disconnected.");
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        self.generation += 1;
        self.set_devices(Vec::new());
        self.set_state(ConnectionState::Disconnected);
    }

    /// Keeps the known devices in place, drops the ones the server no longer reports and appends
    /// new ones in server order.
    fn merge_devices(&mut self, reported: Vec<Arc<dyn Device>>) {
        let mut devices: Vec<Arc<dyn Device>> = self
            .devices
            .iter()
            .filter_map(|existing| {
                reported
                    .iter()
                    .find(|device| device.index() == existing.index())
                    .cloned()
            })
            .collect();
        for device in reported {
            if !devices
                .iter()
                .any(|existing| existing.index() == device.index())
            {
                devices.push(device);
            }
        }
        self.set_devices(devices);
    }

    fn set_devices(&mut self, devices: Vec<Arc<dyn Device>>) {
        let before = self.device_infos();
        self.devices = devices;
        let after = self.device_infos();
        if before != after {
            self.devices_callbacks
                .iter()
                .for_each(|callback| callback(&after));
        }
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        self.state = state;
        self.state_callbacks
            .iter()
            .for_each(|callback| callback(state));
    }
}

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
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, Receiver, Sender};
use tracing::{debug, info};

use crate::error::{DeviceError, TransportError};

use super::TransportEvent;

const EVENT_BUFFER: usize = 64;
const DEFAULT_DEVICE_COUNT: u32 = 2;

/// A command received by a mock device.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Command {
    Vibrate(f64),
    Stop,
}

/// A mock device. Doesn't actually vibrate anything, but remembers what it was told to do.
pub struct Device {
    index: u32,
    name: String,
    vibration: bool,
    failing: AtomicBool,
    hanging: AtomicBool,
    commands: Mutex<Vec<Command>>,
}

impl Device {
    /// Creates a new mock vibrator.
    pub fn new(index: u32, name: &str) -> Device {
        Device {
            index,
            name: name.to_string(),
            vibration: true,
            failing: AtomicBool::new(false),
            hanging: AtomicBool::new(false),
            commands: Mutex::new(Vec::new()),
        }
    }

    /// Creates a new mock device with no vibration actuator.
    pub fn without_vibration(index: u32, name: &str) -> Device {
        Device {
            vibration: false,
            ..Device::new(index, name)
        }
    }

    /// Makes the device reject (or accept again) every command.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Makes the device never answer (or answer again) any command.
    pub fn set_hanging(&self, hanging: bool) {
        self.hanging.store(hanging, Ordering::Relaxed);
    }

    /// Returns every command the device has accepted.
    pub fn commands(&self) -> Vec<Command> {
        self.commands.lock().clone()
    }

    /// Returns the last command the device accepted.
    pub fn last_command(&self) -> Option<Command> {
        self.commands.lock().last().copied()
    }

    /// Returns the number of vibrate commands the device accepted.
    pub fn vibrate_count(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| matches!(command, Command::Vibrate(_)))
            .count()
    }

    /// Returns the number of stop commands the device accepted.
    pub fn stop_count(&self) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|command| matches!(command, Command::Stop))
            .count()
    }

    async fn hang_if_set(&self) {
        if self.hanging.load(Ordering::Relaxed) {
            std::future::pending::<()>().await;
        }
    }

    fn record(&self, command: Command) -> Result<(), DeviceError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(DeviceError::Rejected(format!(
                "{} is set to fail",
                self.name
            )));
        }
        debug!(device = self.name, command = ?command, "Mock device command.");
        self.commands.lock().push(command);
        Ok(())
    }
}

#[async_trait]
impl super::Device for Device {
    fn index(&self) -> u32 {
        self.index
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn has_vibration(&self) -> bool {
        self.vibration
    }

    async fn vibrate(&self, speed: f64) -> Result<(), DeviceError> {
        self.hang_if_set().await;
        if !self.vibration {
            return Err(DeviceError::Unsupported);
        }
        self.record(Command::Vibrate(speed))
    }

    async fn stop(&self) -> Result<(), DeviceError> {
        self.hang_if_set().await;
        self.record(Command::Stop)
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock device server. Devices known to the server are reported on connect; discoverable devices
/// show up once a scan starts.
#[derive(Clone)]
pub struct Transport {
    name: String,
    connected: Arc<AtomicBool>,
    scanning: Arc<AtomicBool>,
    fail_connect: Arc<AtomicBool>,
    scans: Arc<AtomicUsize>,
    known: Arc<Mutex<Vec<Arc<Device>>>>,
    discoverable: Arc<Mutex<Vec<Arc<Device>>>>,
    events: Arc<Mutex<Option<Sender<TransportEvent>>>>,
}

impl Transport {
    /// Gets a mock server with a couple of discoverable vibrators.
    pub fn get(name: &str) -> Transport {
        let transport = Transport::empty(name);
        {
            let mut discoverable = transport.discoverable.lock();
            for index in 0..DEFAULT_DEVICE_COUNT {
                discoverable.push(Arc::new(Device::new(
                    index,
                    &format!("Mock Vibrator {}", index),
                )));
            }
        }
        transport
    }

    /// Gets a mock server that knows no devices.
    pub fn empty(name: &str) -> Transport {
        Transport {
            name: name.to_string(),
            connected: Arc::new(AtomicBool::new(false)),
            scanning: Arc::new(AtomicBool::new(false)),
            fail_connect: Arc::new(AtomicBool::new(false)),
            scans: Arc::new(AtomicUsize::new(0)),
            known: Arc::new(Mutex::new(Vec::new())),
            discoverable: Arc::new(Mutex::new(Vec::new())),
            events: Arc::new(Mutex::new(None)),
        }
    }

    /// Adds a device the server already knows about when a client connects.
    pub fn with_known_device(self, device: Arc<Device>) -> Transport {
        self.known.lock().push(device);
        self
    }

    /// Adds a device that will be found by the next scan.
    pub fn with_discoverable_device(self, device: Arc<Device>) -> Transport {
        self.discoverable.lock().push(device);
        self
    }

    /// Makes future connection attempts fail.
    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Returns true if a session is live.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Returns true if the server is scanning.
    pub fn is_scanning(&self) -> bool {
        self.scanning.load(Ordering::Relaxed)
    }

    /// Returns the number of scans started.
    pub fn scan_count(&self) -> usize {
        self.scans.load(Ordering::Relaxed)
    }

    /// Simulates a device connecting to the server.
    pub fn add_device(&self, device: Arc<Device>) {
        self.known.lock().push(device.clone());
        self.emit(TransportEvent::DeviceAdded(device));
    }

    /// Simulates a device leaving the server.
    pub fn remove_device(&self, index: u32) {
        self.known.lock().retain(|device| device.index != index);
        self.emit(TransportEvent::DeviceRemoved(index));
    }

    /// Simulates the server closing the session.
    pub fn drop_session(&self) {
        self.connected.store(false, Ordering::Relaxed);
        self.scanning.store(false, Ordering::Relaxed);
        self.emit(TransportEvent::Disconnected);
        self.events.lock().take();
    }

    fn emit(&self, event: TransportEvent) {
        if let Some(events) = self.events.lock().as_ref() {
            if let Err(e) = events.try_send(event) {
                debug!(err = %e, "Mock transport dropped event.");
            }
        }
    }

    fn check_connected(&self) -> Result<(), TransportError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(TransportError::NotConnected)
        }
    }
}

#[async_trait]
impl super::Transport for Transport {
    async fn connect(&self, address: &str) -> Result<Receiver<TransportEvent>, TransportError> {
        if self.fail_connect.load(Ordering::Relaxed) {
            return Err(TransportError::Mock(format!(
                "{} refused the connection",
                address
            )));
        }

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        *self.events.lock() = Some(events_tx);
        self.connected.store(true, Ordering::Relaxed);

        info!(server = self.name, address, "Connected to mock server.");
        Ok(events_rx)
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.connected.store(false, Ordering::Relaxed);
        self.scanning.store(false, Ordering::Relaxed);
        // Dropping the sender ends the event stream.
        self.events.lock().take();
        Ok(())
    }

    async fn start_scanning(&self) -> Result<(), TransportError> {
        self.check_connected()?;
        self.scanning.store(true, Ordering::Relaxed);
        self.scans.fetch_add(1, Ordering::Relaxed);

        let found: Vec<Arc<Device>> = self.discoverable.lock().drain(..).collect();
        for device in found {
            self.add_device(device);
        }
        Ok(())
    }

    async fn stop_scanning(&self) -> Result<(), TransportError> {
        self.check_connected()?;
        self.scanning.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn devices(&self) -> Result<Vec<Arc<dyn super::Device>>, TransportError> {
        self.check_connected()?;
        Ok(self
            .known
            .lock()
            .iter()
            .map(|device| device.clone() as Arc<dyn super::Device>)
            .collect())
    }
}

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
    sync::{Arc, Weak},
    time::Duration,
};

use tokio::{
    sync::{mpsc::Receiver, Mutex},
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{info, span, warn, Instrument, Level, Span};

use crate::{
    connection::{Connection, ConnectionState, DevicesCallback, StateCallback, Transition},
    device::{DeviceInfo, Transport, TransportEvent},
    error::{ConnectionError, PlaybackError, ScanError, VibrationError},
    pattern::{clamp_intensity, VibePattern},
    scheduler::{self, Scheduler, Session, Tick},
};

/// The default time the device server is given to find devices.
pub const DEFAULT_SCAN_WINDOW: Duration = Duration::from_secs(5);

struct Inner {
    connection: Connection,
    scheduler: Scheduler,
}

/// Plays vibration patterns on the devices of a device server.
///
/// All state lives behind one lock. Every tick takes the lock before evaluating the pattern, so
/// a tick never races a stop, a disconnect or a new play.
pub struct Player {
    inner: Arc<Mutex<Inner>>,
    /// How long a scan runs before the device list is refreshed.
    scan_window: Duration,
    /// The logging span.
    span: Span,
}

impl Player {
    /// Creates a new player for the device server at the given address.
    pub fn new(
        transport: Arc<dyn Transport>,
        address: &str,
        tick_interval: Duration,
        scan_window: Duration,
    ) -> Result<Player, PlaybackError> {
        Ok(Player {
            inner: Arc::new(Mutex::new(Inner {
                connection: Connection::new(transport, address),
                scheduler: Scheduler::new(tick_interval)?,
            })),
            scan_window,
            span: span!(Level::INFO, "player", address),
        })
    }

    /// Connects to the device server. Does nothing if already connected.
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut inner = self.inner.lock().await;
        if let Some(session) = inner.connection.connect().await? {
            tokio::spawn(
                Player::pump_events(
                    Arc::downgrade(&self.inner),
                    session.generation,
                    session.events,
                )
                .instrument(self.span.clone()),
            );
        }
        Ok(())
    }

    /// Feeds transport events into the connection until the session ends.
    async fn pump_events(
        inner: Weak<Mutex<Inner>>,
        generation: u64,
        mut events: Receiver<TransportEvent>,
    ) {
        while let Some(event) = events.recv().await {
            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock().await;
            if inner.connection.handle_event(generation, event) == Transition::Disconnected {
                Player::halt(&mut inner);
                return;
            }
        }

        // The stream closed without saying why. Treat it as a dropped session if it was current.
        let Some(inner) = inner.upgrade() else {
            return;
        };
        let mut inner = inner.lock().await;
        if inner.connection.generation() == generation
            && inner.connection.handle_event(generation, TransportEvent::Disconnected)
                == Transition::Disconnected
        {
            Player::halt(&mut inner);
        }
    }

    /// Ends playback after the session went away. There are no devices left to stop.
    fn halt(inner: &mut Inner) {
        if inner.scheduler.cancel() {
            info!("Playback halted, the device server went away.");
        }
    }

    /// Scans for devices for the scan window, then refreshes the device list. If the session was
    /// replaced during the window, the refresh is skipped.
    pub async fn scan(&self) -> Result<(), ScanError> {
        let generation = self.inner.lock().await.connection.begin_scan().await?;
        // The lock is released while waiting so playback and events keep flowing.
        time::sleep(self.scan_window).await;
        self.inner
            .lock()
            .await
            .connection
            .finish_scan(generation)
            .await
    }

    /// Stops playback and all devices, then tears down the session.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        inner.scheduler.cancel();
        scheduler::stop_all(inner.connection.devices()).await;
        inner.connection.disconnect().await;
    }

    /// Plays the pattern on the connected devices, replacing anything already playing. Track N
    /// drives device N in device list order.
    pub async fn play(&self, pattern: &VibePattern) -> Result<(), PlaybackError> {
        let mut inner = self.inner.lock().await;
        inner.connection.require_connected()?;
        if inner.connection.devices().is_empty() {
            return Err(PlaybackError::NoDevices);
        }

        let session = Session::new(pattern, Instant::now())?;
        let session = inner.scheduler.start(session);
        let devices = inner.connection.devices().len();
        let tracks = session.pattern().tracks.len();
        if tracks != devices {
            info!(
                tracks,
                devices, "Track and device counts differ. Unmatched ones are left idle."
            );
        }

        let join = tokio::spawn(
            Player::run_session(
                Arc::downgrade(&self.inner),
                session.clone(),
                inner.scheduler.tick_interval(),
            )
            .instrument(self.span.clone()),
        );
        inner.scheduler.attach(&session, join);

        info!(pattern = %session.pattern(), "Playing pattern.");
        Ok(())
    }

    /// Drives a session until it finishes or is cancelled.
    async fn run_session(
        inner: Weak<Mutex<Inner>>,
        session: Arc<Session>,
        tick_interval: Duration,
    ) {
        let cancel = session.cancel_handle().clone();
        let mut ticker = time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = cancel.cancelled() => return,
            }

            let Some(inner) = inner.upgrade() else {
                return;
            };
            let mut inner = inner.lock().await;
            // Stop, disconnect or a new play may have won the lock first.
            if cancel.is_cancelled() {
                return;
            }

            match session.tick_at(session.started().elapsed()) {
                Tick::Dispatch { levels, .. } => {
                    scheduler::dispatch(inner.connection.devices(), &levels).await
                }
                Tick::Finished => {
                    inner.scheduler.complete(&cancel);
                    scheduler::stop_all(inner.connection.devices()).await;
                    info!(pattern = session.pattern().name, "Pattern finished.");
                    return;
                }
            }
        }
    }

    /// Stops playback and every device. Safe to call when nothing is playing.
    pub async fn stop(&self) {
        let mut inner = self.inner.lock().await;
        if inner.scheduler.cancel() {
            info!("Playback stopped.");
        } else {
            info!("Player is not active, stopping devices anyway.");
        }
        scheduler::stop_all(inner.connection.devices()).await;
    }

    /// Sends one intensity from 0 to 100 straight to a device. This doesn't touch the scheduler,
    /// so the next playback tick overrides it.
    pub async fn set_vibration(
        &self,
        intensity: f64,
        device_index: usize,
    ) -> Result<(), VibrationError> {
        let inner = self.inner.lock().await;
        inner.connection.require_connected()?;
        let device = inner
            .connection
            .devices()
            .get(device_index)
            .ok_or(VibrationError::NoSuchDevice(device_index))?;

        let intensity = clamp_intensity(intensity);
        scheduler::vibrate(device_index, &**device, intensity).await?;
        info!(device = device.name(), intensity, "Set vibration.");
        Ok(())
    }

    /// Waits for the current playback to end, whether it finished or was stopped. Returns
    /// immediately if nothing is playing.
    pub async fn wait_for_playback(&self) {
        let handle = self.inner.lock().await.scheduler.active_handle();
        if let Some(handle) = handle {
            handle.cancelled().await;
        }
    }

    /// Returns true if a pattern is playing.
    pub async fn is_playing(&self) -> bool {
        self.inner.lock().await.scheduler.is_playing()
    }

    /// Returns the connection state.
    pub async fn state(&self) -> ConnectionState {
        self.inner.lock().await.connection.state()
    }

    /// Returns the connected devices in playback order.
    pub async fn devices(&self) -> Vec<DeviceInfo> {
        self.inner.lock().await.connection.device_infos()
    }

    /// Subscribes to device list changes. Callbacks run while the player is locked and must not
    /// call back into it.
    pub async fn on_devices_changed(&self, callback: DevicesCallback) {
        self.inner
            .lock()
            .await
            .connection
            .on_devices_changed(callback);
    }

    /// Subscribes to connection state changes. Callbacks run while the player is locked and must
    /// not call back into it.
    pub async fn on_state_changed(&self, callback: StateCallback) {
        self.inner.lock().await.connection.on_state_changed(callback);
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.try_lock() {
            if inner.scheduler.cancel() {
                warn!("Player dropped while playing.");
            }
        }
    }
}

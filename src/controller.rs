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
use std::{fmt, io, sync::Arc};

use tokio::{
    sync::mpsc::{self, Sender},
    task::{JoinError, JoinHandle},
};
use tracing::{error, info, span, Instrument, Level};

use crate::{pattern::VibePattern, player::Player};

pub mod keyboard;

/// Controller events that will trigger behavior in the player.
#[derive(Debug, PartialEq)]
pub enum Event {
    /// Connects to the device server.
    Connect,

    /// Scans for devices. Other events are still handled while the scan runs.
    Scan,

    /// Plays the loaded pattern, replacing anything already playing.
    Play,

    /// Stops playback and all devices. If nothing is playing, only stops the devices.
    Stop,

    /// Disconnects from the device server.
    Disconnect,

    /// Logs the current device list.
    Devices,

    /// Sends one intensity straight to the device at the given position.
    Vibrate { intensity: f64, device: usize },
}

pub trait Driver: Send + Sync + 'static {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>>;
}

/// Drives a player from a stream of events.
pub struct Controller {
    handle: JoinHandle<()>,
}

impl Controller {
    /// Creates a new controller with the given driver.
    pub fn new(player: Arc<Player>, pattern: VibePattern, driver: Arc<dyn Driver>) -> Controller {
        Controller {
            handle: tokio::spawn(
                Controller::trigger_events(player, pattern, driver)
                    .instrument(span!(Level::INFO, "controller")),
            ),
        }
    }

    /// Join will block until the controller finishes.
    pub async fn join(&mut self) -> Result<(), JoinError> {
        (&mut self.handle).await
    }

    /// Triggers player events by watching the driver and getting events from it.
    async fn trigger_events(player: Arc<Player>, pattern: VibePattern, driver: Arc<dyn Driver>) {
        let (events_tx, mut events_rx) = mpsc::channel(1);
        let join_handle = driver.monitor_events(events_tx);

        info!(pattern = %pattern, "Controller started.");

        while let Some(event) = events_rx.recv().await {
            info!(event = ?event, "Received event.");

            match event {
                Event::Connect => log_failure("connect", player.connect().await),
                Event::Scan => {
                    let player = player.clone();
                    tokio::spawn(
                        async move { log_failure("scan", player.scan().await) }
                            .in_current_span(),
                    );
                }
                Event::Play => log_failure("play", player.play(&pattern).await),
                Event::Stop => player.stop().await,
                Event::Disconnect => player.disconnect().await,
                Event::Devices => {
                    let devices = player.devices().await;
                    if devices.is_empty() {
                        let state = player.state().await;
                        info!(state = %state, "No devices.");
                    }
                    for (position, device) in devices.iter().enumerate() {
                        info!(position, device = %device, "Device.");
                    }
                }
                Event::Vibrate { intensity, device } => log_failure(
                    "vibrate",
                    player.set_vibration(intensity, device).await,
                ),
            }
        }

        info!("Controller closing.");
        match join_handle.await {
            Ok(Err(e)) => error!(err = %e, "Event monitor failed."),
            Err(e) => error!(err = %e, "Error waiting for event monitor to stop."),
            Ok(Ok(())) => {}
        }
        player.disconnect().await;
    }
}

fn log_failure<E: fmt::Display>(action: &str, result: Result<(), E>) {
    if let Err(e) = result {
        error!(action, err = %e, "Error talking to player.");
    }
}

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
use std::io;

use tokio::{sync::mpsc::Sender, task::JoinHandle};
use tracing::{info, span, warn, Level};

use super::Event;

const CONNECT: &str = "connect";
const SCAN: &str = "scan";
const PLAY: &str = "play";
const STOP: &str = "stop";
const DISCONNECT: &str = "disconnect";
const DEVICES: &str = "devices";
const VIBRATE: &str = "vibrate";

/// A controller that controls a player using the keyboard.
pub struct Driver {}

impl Driver {
    pub fn new() -> Driver {
        Driver {}
    }

    /// Reads one command and forwards it. Returns false once the input is exhausted.
    fn monitor_io<R, W>(
        events_tx: &Sender<Event>,
        mut reader: R,
        mut writer: W,
    ) -> Result<bool, io::Error>
    where
        R: io::BufRead,
        W: io::Write,
    {
        write!(
            writer,
            "Command ({}, {}, {}, {}, {}, {}, {} <intensity> <device>): ",
            CONNECT, SCAN, PLAY, STOP, DISCONNECT, DEVICES, VIBRATE,
        )?;
        writer.flush()?;
        let mut input: String = String::default();
        if reader.read_line(&mut input)? == 0 {
            return Ok(false);
        }

        let input = input.trim().to_lowercase();
        let mut words = input.split_whitespace();
        let event = match words.next() {
            Some(CONNECT) => Some(Event::Connect),
            Some(SCAN) => Some(Event::Scan),
            Some(PLAY) => Some(Event::Play),
            Some(STOP) => Some(Event::Stop),
            Some(DISCONNECT) => Some(Event::Disconnect),
            Some(DEVICES) => Some(Event::Devices),
            Some(VIBRATE) => {
                let intensity = words.next().and_then(|word| word.parse::<f64>().ok());
                let device = words.next().and_then(|word| word.parse::<usize>().ok());
                match (intensity, device) {
                    (Some(intensity), Some(device)) => Some(Event::Vibrate { intensity, device }),
                    _ => {
                        warn!(input, "Expected: vibrate <intensity 0-100> <device index>");
                        None
                    }
                }
            }
            _ => {
                warn!(input, "Unrecognized input");
                None
            }
        };

        if let Some(event) = event {
            events_tx
                .blocking_send(event)
                .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
        }
        Ok(true)
    }
}

impl Default for Driver {
    fn default() -> Self {
        Driver::new()
    }
}

impl super::Driver for Driver {
    fn monitor_events(&self, events_tx: Sender<Event>) -> JoinHandle<Result<(), io::Error>> {
        tokio::task::spawn_blocking(move || {
            let span = span!(Level::INFO, "keyboard driver");
            let _enter = span.enter();

            info!("Keyboard driver started.");

            while Self::monitor_io(&events_tx, io::stdin().lock(), io::stdout())? {}

            info!("Keyboard input closed.");
            Ok(())
        })
    }
}

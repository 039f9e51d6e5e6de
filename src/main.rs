// Copyright (C) 2025 Michael Wilson <mike@mdwn.dev>
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
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use duration_string::DurationString;
use vibecanvas::config;
use vibecanvas::device::{self, DEFAULT_CLIENT_NAME, DEFAULT_SERVER_ADDRESS};
use vibecanvas::player::{Player, DEFAULT_SCAN_WINDOW};
use vibecanvas::scheduler::DEFAULT_TICK_INTERVAL;
use vibecanvas::util::format_millis;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "Plays drawn vibration patterns on connected devices."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connects to the device server, scans and lists the devices found.
    Devices {
        /// The address of the device server.
        #[arg(short, long, default_value = DEFAULT_SERVER_ADDRESS)]
        address: String,
        /// How long to scan for, e.g. 5s.
        #[arg(short, long)]
        scan_window: Option<String>,
    },
    /// Plays a pattern file until it finishes or Ctrl-C is pressed.
    Play {
        /// The path to the pattern file (.json, .yaml or .yml).
        pattern: String,
        /// The address of the device server.
        #[arg(short, long, default_value = DEFAULT_SERVER_ADDRESS)]
        address: String,
        /// How long to scan for, e.g. 5s.
        #[arg(short, long)]
        scan_window: Option<String>,
    },
    /// Vibrates a single device at a fixed intensity.
    Vibrate {
        /// The intensity, from 0 to 100.
        intensity: f64,
        /// The position of the device in the device list.
        device_index: usize,
        /// The address of the device server.
        #[arg(short, long, default_value = DEFAULT_SERVER_ADDRESS)]
        address: String,
        /// How long to vibrate for, e.g. 2s.
        #[arg(short, long, default_value = "1s")]
        duration: String,
    },
    /// Parses and validates a pattern file.
    Verify {
        /// The path to the pattern file.
        pattern: String,
    },
    /// Start will load the player config and accept commands from the keyboard.
    Start {
        /// The path to the player config.
        player_path: String,
    },
}

fn parse_duration(value: Option<String>, default: Duration) -> Result<Duration, Box<dyn Error>> {
    match value {
        Some(value) => Ok(DurationString::from_string(value)?.into()),
        None => Ok(default),
    }
}

/// Connects to the device server and scans for devices.
async fn connect(address: &str, scan_window: Duration) -> Result<Player, Box<dyn Error>> {
    let transport = device::get_transport(address, DEFAULT_CLIENT_NAME)?;
    let player = Player::new(transport, address, DEFAULT_TICK_INTERVAL, scan_window)?;
    player.connect().await?;
    println!("Scanning for {}...", format_millis(scan_window.as_secs_f64() * 1000.0));
    player.scan().await?;

    let devices = player.devices().await;
    if devices.is_empty() {
        println!("No devices found.");
    } else {
        println!("Devices:");
        for (position, device) in devices.iter().enumerate() {
            println!("{}. {}", position, device);
        }
    }
    Ok(player)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Devices {
            address,
            scan_window,
        } => {
            let player = connect(&address, parse_duration(scan_window, DEFAULT_SCAN_WINDOW)?).await?;
            player.disconnect().await;
        }
        Commands::Play {
            pattern,
            address,
            scan_window,
        } => {
            let pattern = config::parse_pattern(&PathBuf::from(pattern))?;
            pattern.validate()?;

            let player = connect(&address, parse_duration(scan_window, DEFAULT_SCAN_WINDOW)?).await?;
            player.play(&pattern).await?;
            println!("Playing {}", pattern);

            tokio::select! {
                _ = player.wait_for_playback() => println!("Finished."),
                result = tokio::signal::ctrl_c() => {
                    result?;
                    println!("Interrupted.");
                }
            }
            player.disconnect().await;
        }
        Commands::Vibrate {
            intensity,
            device_index,
            address,
            duration,
        } => {
            let duration = parse_duration(Some(duration), Duration::ZERO)?;
            let player = connect(&address, DEFAULT_SCAN_WINDOW).await?;
            player.set_vibration(intensity, device_index).await?;

            tokio::select! {
                _ = tokio::time::sleep(duration) => {},
                result = tokio::signal::ctrl_c() => result?,
            }
            player.disconnect().await;
        }
        Commands::Verify { pattern } => {
            let path = PathBuf::from(pattern);
            let pattern = config::parse_pattern(&path)?;
            pattern.validate()?;

            println!("{}", pattern);
            for (position, track) in pattern.tracks.iter().enumerate() {
                let track = track.sorted();
                match (track.points.first(), track.points.last()) {
                    (Some(first), Some(last)) => println!(
                        "- track {} (motor {}): {} points, {} to {}",
                        position,
                        track.motor_id,
                        track.points.len(),
                        format_millis(first.time_ms),
                        format_millis(last.time_ms)
                    ),
                    _ => println!(
                        "- track {} (motor {}): no points",
                        position, track.motor_id
                    ),
                }
            }
            if !pattern.has_playable_track() {
                return Err(format!(
                    "{} has no track with at least two points and can't be played",
                    path.display()
                )
                .into());
            }
        }
        Commands::Start { player_path } => {
            config::init_player_and_controller(&PathBuf::from(player_path))?
                .join()
                .await?;
        }
    }

    Ok(())
}

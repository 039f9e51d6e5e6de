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
use std::{future::Future, sync::Arc, time::Duration};

use futures_util::future::join_all;
use tokio::{
    task::JoinHandle,
    time::{self, Instant},
};
use tracing::{debug, warn};

use crate::{
    device::Device,
    error::{DeviceDispatchError, DeviceError, PlaybackError},
    interpolate::interpolate,
    pattern::{clamp_intensity, VibePattern, MAX_INTENSITY},
    playsync::CancelHandle,
};

/// The default time between playback ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(30);

/// The outcome of evaluating a session at a point in time.
#[derive(Debug, PartialEq)]
pub enum Tick {
    /// Send these intensities, one per track in track order.
    Dispatch { position_ms: f64, levels: Vec<f64> },
    /// A non-looping pattern has run its course.
    Finished,
}

/// A single playback of a pattern.
pub struct Session {
    pattern: VibePattern,
    started: Instant,
    cancel: CancelHandle,
}

impl Session {
    /// Creates a session for the given pattern. The session plays a sorted copy, so later changes
    /// to the caller's pattern have no effect.
    pub fn new(pattern: &VibePattern, started: Instant) -> Result<Session, PlaybackError> {
        pattern.validate()?;
        if !pattern.has_playable_track() {
            return Err(PlaybackError::InsufficientPoints);
        }

        Ok(Session {
            pattern: pattern.sorted(),
            started,
            cancel: CancelHandle::new(),
        })
    }

    /// The pattern being played.
    pub fn pattern(&self) -> &VibePattern {
        &self.pattern
    }

    /// When the session started.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// The handle that ends this session.
    pub fn cancel_handle(&self) -> &CancelHandle {
        &self.cancel
    }

    /// Evaluates the pattern at the given time since the session started.
    pub fn tick_at(&self, elapsed: Duration) -> Tick {
        let duration_ms = self.pattern.duration_ms;
        let mut position_ms = elapsed.as_secs_f64() * 1000.0;

        if self.pattern.is_looping() {
            position_ms %= duration_ms;
        } else if position_ms >= duration_ms {
            return Tick::Finished;
        }

        let levels = self
            .pattern
            .tracks
            .iter()
            .map(|track| clamp_intensity(interpolate(&track.points, position_ms)))
            .collect();

        Tick::Dispatch {
            position_ms,
            levels,
        }
    }
}

struct Active {
    session: Arc<Session>,
    join: Option<JoinHandle<()>>,
}

/// Tracks the one active playback session. Starting a new session always ends the previous one,
/// so there is never more than one timer driving the devices.
pub struct Scheduler {
    tick_interval: Duration,
    active: Option<Active>,
}

impl Scheduler {
    /// Creates an idle scheduler. The tick interval must be non-zero.
    pub fn new(tick_interval: Duration) -> Result<Scheduler, PlaybackError> {
        if tick_interval.is_zero() {
            return Err(PlaybackError::ZeroTickInterval);
        }
        Ok(Scheduler {
            tick_interval,
            active: None,
        })
    }

    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Returns true if a session is active.
    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    /// Returns the cancel handle of the active session, if any.
    pub fn active_handle(&self) -> Option<CancelHandle> {
        self.active
            .as_ref()
            .map(|active| active.session.cancel_handle().clone())
    }

    /// Makes the given session the active one, cancelling whatever was playing.
    pub fn start(&mut self, session: Session) -> Arc<Session> {
        self.cancel();
        let session = Arc::new(session);
        self.active = Some(Active {
            session: session.clone(),
            join: None,
        });
        session
    }

    /// Records the task driving the session. If the session is no longer active, the task is
    /// aborted instead.
    pub fn attach(&mut self, session: &Arc<Session>, join: JoinHandle<()>) {
        match self.active.as_mut() {
            Some(active) if Arc::ptr_eq(&active.session, session) => active.join = Some(join),
            _ => join.abort(),
        }
    }

    /// Cancels the active session and its task. Returns true if anything was playing.
    pub fn cancel(&mut self) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        active.session.cancel_handle().cancel();
        if let Some(join) = active.join {
            join.abort();
        }
        true
    }

    /// Called by the task driving a session once the pattern has finished. Only clears the
    /// scheduler if that session is still the active one.
    pub fn complete(&mut self, cancel: &CancelHandle) -> bool {
        let is_current = self
            .active
            .as_ref()
            .is_some_and(|active| active.session.cancel_handle().same_session(cancel));
        if !is_current {
            return false;
        }

        // The caller is the session's own task, so its join handle is dropped rather than aborted.
        self.active = None;
        cancel.cancel();
        true
    }
}

/// How long a device gets to accept a command before it is given up on for that tick.
pub const DEVICE_TIMEOUT: Duration = Duration::from_secs(1);

/// Sends one command to one device, bounded by [DEVICE_TIMEOUT].
async fn send<F>(
    index: usize,
    device: &dyn Device,
    command: F,
) -> Result<(), DeviceDispatchError>
where
    F: Future<Output = Result<(), DeviceError>>,
{
    let result = match time::timeout(DEVICE_TIMEOUT, command).await {
        Ok(result) => result,
        Err(_) => Err(DeviceError::TimedOut(DEVICE_TIMEOUT)),
    };
    result.map_err(|source| DeviceDispatchError {
        index,
        device: device.name(),
        source,
    })
}

/// Sets one device to an intensity from 0 to 100.
pub async fn vibrate(
    index: usize,
    device: &dyn Device,
    level: f64,
) -> Result<(), DeviceDispatchError> {
    let speed = clamp_intensity(level) / MAX_INTENSITY;
    send(index, device, device.vibrate(speed)).await
}

/// Sends one intensity per device, pairing tracks and devices by position. Extra tracks or extra
/// devices are left alone. A failing or unresponsive device is logged and doesn't hold up the
/// others.
pub async fn dispatch(devices: &[Arc<dyn Device>], levels: &[f64]) {
    let sends = devices
        .iter()
        .zip(levels.iter())
        .enumerate()
        .map(|(index, (device, level))| vibrate(index, &**device, *level));

    for result in join_all(sends).await {
        if let Err(e) = result {
            warn!(err = %e, "Unable to send vibration.");
        }
    }
}

/// Stops every device. Failures are logged.
pub async fn stop_all(devices: &[Arc<dyn Device>]) {
    debug!(devices = devices.len(), "Stopping all devices.");
    let stops = devices
        .iter()
        .enumerate()
        .map(|(index, device)| send(index, &**device, device.stop()));

    for result in join_all(stops).await {
        if let Err(e) = result {
            warn!(err = %e, "Unable to stop device.");
        }
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, time::Duration};

    use tokio::time::Instant;

    use crate::{
        device::{mock::Command, test, Device},
        error::{DeviceError, PatternError, PlaybackError},
        pattern::{MotorTrack, PatternPoint, VibePattern},
    };

    use super::{
        dispatch, stop_all, vibrate, Scheduler, Session, Tick, DEFAULT_TICK_INTERVAL,
        DEVICE_TIMEOUT,
    };

    fn ramp(r#loop: bool) -> VibePattern {
        VibePattern::new(
            2000.0,
            r#loop,
            vec![
                MotorTrack::new(
                    "motor-0",
                    vec![
                        PatternPoint::new(0.0, 0.0),
                        PatternPoint::new(1000.0, 100.0),
                        PatternPoint::new(2000.0, 0.0),
                    ],
                ),
                MotorTrack::new(
                    "motor-1",
                    vec![PatternPoint::new(2000.0, 10.0), PatternPoint::new(0.0, 90.0)],
                ),
            ],
        )
    }

    fn levels(tick: Tick) -> Vec<f64> {
        match tick {
            Tick::Dispatch { levels, .. } => levels,
            Tick::Finished => panic!("expected a dispatch"),
        }
    }

    #[test]
    fn test_tick_at() {
        let session = Session::new(&ramp(false), Instant::now()).expect("valid pattern");

        assert_eq!(levels(session.tick_at(Duration::ZERO)), vec![0.0, 90.0]);
        assert_eq!(
            levels(session.tick_at(Duration::from_millis(500))),
            vec![50.0, 70.0]
        );
        assert_eq!(
            levels(session.tick_at(Duration::from_millis(1000))),
            vec![100.0, 50.0]
        );
        assert_eq!(
            session.tick_at(Duration::from_millis(2000)),
            Tick::Finished
        );
        assert_eq!(
            session.tick_at(Duration::from_millis(2500)),
            Tick::Finished
        );
    }

    #[test]
    fn test_tick_at_looping() {
        let session = Session::new(&ramp(true), Instant::now()).expect("valid pattern");

        assert_eq!(
            session.tick_at(Duration::from_millis(2500)),
            session.tick_at(Duration::from_millis(500))
        );
        match session.tick_at(Duration::from_millis(4250)) {
            Tick::Dispatch { position_ms, .. } => assert_eq!(position_ms, 250.0),
            Tick::Finished => panic!("looping patterns never finish"),
        }
    }

    #[test]
    fn test_tick_at_clamps() {
        let pattern = VibePattern::new(
            1000.0,
            false,
            vec![MotorTrack::new(
                "motor-0",
                vec![PatternPoint::new(0.0, 150.0), PatternPoint::new(1000.0, -20.0)],
            )],
        );
        let session = Session::new(&pattern, Instant::now()).expect("valid pattern");

        assert_eq!(levels(session.tick_at(Duration::ZERO)), vec![100.0]);
        assert_eq!(
            levels(session.tick_at(Duration::from_millis(999))),
            vec![0.0]
        );
    }

    #[test]
    fn test_new_session_errors() {
        let pattern = VibePattern::new(
            1000.0,
            false,
            vec![MotorTrack::new("motor-0", vec![PatternPoint::new(0.0, 50.0)])],
        );
        assert!(matches!(
            Session::new(&pattern, Instant::now()),
            Err(PlaybackError::InsufficientPoints)
        ));

        let pattern = VibePattern::new(0.0, false, ramp(false).tracks);
        assert!(matches!(
            Session::new(&pattern, Instant::now()),
            Err(PlaybackError::InvalidPattern(
                PatternError::InvalidDuration(_)
            ))
        ));
    }

    #[tokio::test]
    async fn test_scheduler_single_session() {
        assert!(matches!(
            Scheduler::new(Duration::ZERO),
            Err(PlaybackError::ZeroTickInterval)
        ));

        let mut scheduler = Scheduler::new(DEFAULT_TICK_INTERVAL).expect("non-zero interval");
        assert!(!scheduler.is_playing());
        assert!(!scheduler.cancel());

        let first = scheduler.start(Session::new(&ramp(true), Instant::now()).expect("valid"));
        let first_handle = first.cancel_handle().clone();
        scheduler.attach(&first, tokio::spawn(std::future::pending()));
        assert!(scheduler.is_playing());

        let second = scheduler.start(Session::new(&ramp(true), Instant::now()).expect("valid"));
        assert!(first_handle.is_cancelled());
        assert!(!second.cancel_handle().is_cancelled());

        // A stale session can't attach or complete.
        scheduler.attach(&first, tokio::spawn(std::future::pending()));
        assert!(!scheduler.complete(&first_handle));
        assert!(scheduler.is_playing());

        let second_handle = second.cancel_handle().clone();
        assert!(scheduler.complete(&second_handle));
        assert!(second_handle.is_cancelled());
        assert!(!scheduler.is_playing());
        assert!(scheduler.active_handle().is_none());
    }

    #[tokio::test]
    async fn test_dispatch() {
        let failing = Arc::new(test::Device::new(0, "failing"));
        failing.set_failing(true);
        let working = Arc::new(test::Device::new(1, "working"));
        let unused = Arc::new(test::Device::new(2, "unused"));
        let devices: Vec<Arc<dyn Device>> = vec![failing.clone(), working.clone(), unused.clone()];

        dispatch(&devices, &[20.0, 50.0]).await;
        assert!(failing.commands().is_empty());
        assert_eq!(working.commands(), vec![Command::Vibrate(0.5)]);
        assert!(unused.commands().is_empty());

        // Extra levels have nowhere to go.
        dispatch(&devices[..1], &[10.0, 20.0, 30.0]).await;
        assert_eq!(working.vibrate_count(), 1);

        stop_all(&devices).await;
        assert_eq!(working.last_command(), Some(Command::Stop));
        assert_eq!(unused.last_command(), Some(Command::Stop));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_device_times_out() {
        let hanging = Arc::new(test::Device::new(0, "hanging"));
        hanging.set_hanging(true);
        let working = Arc::new(test::Device::new(1, "working"));
        let devices: Vec<Arc<dyn Device>> = vec![hanging.clone(), working.clone()];

        let started = Instant::now();
        dispatch(&devices, &[40.0, 60.0]).await;
        assert!(started.elapsed() >= DEVICE_TIMEOUT);
        assert!(started.elapsed() < DEVICE_TIMEOUT * 2);
        assert_eq!(working.commands(), vec![Command::Vibrate(0.6)]);

        match vibrate(0, &*hanging, 40.0).await {
            Err(e) => assert!(matches!(e.source, DeviceError::TimedOut(_))),
            Ok(()) => panic!("a hanging device can't succeed"),
        }

        stop_all(&devices).await;
        assert_eq!(working.last_command(), Some(Command::Stop));
        assert!(hanging.commands().is_empty());
    }
}

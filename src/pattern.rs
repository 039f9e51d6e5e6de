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
use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{error::PatternError, util};

/// The lowest intensity a point can carry.
pub const MIN_INTENSITY: f64 = 0.0;

/// The highest intensity a point can carry.
pub const MAX_INTENSITY: f64 = 100.0;

const DEFAULT_VERSION: &str = "1.0";
const DEFAULT_NAME: &str = "Untitled";

/// One authored sample of a curve.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PatternPoint {
    /// The time of the sample, in milliseconds from the start of the pattern.
    pub time_ms: f64,
    /// The intensity of the sample, from 0 to 100.
    pub intensity: f64,
}

impl PatternPoint {
    pub fn new(time_ms: f64, intensity: f64) -> PatternPoint {
        PatternPoint { time_ms, intensity }
    }
}

/// A single channel of intensity over time.
///
/// The motor ID is informational. During playback tracks are bound to devices by their position
/// in the pattern, not by this ID.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotorTrack {
    pub motor_id: String,
    #[serde(default)]
    pub points: Vec<PatternPoint>,
}

impl MotorTrack {
    pub fn new(motor_id: &str, points: Vec<PatternPoint>) -> MotorTrack {
        MotorTrack {
            motor_id: motor_id.to_string(),
            points,
        }
    }

    /// Returns a copy of the track with its points sorted by time. The sort is stable, so points
    /// sharing a time keep the order they were authored in.
    pub fn sorted(&self) -> MotorTrack {
        let mut points = self.points.clone();
        points.sort_by(|a, b| a.time_ms.total_cmp(&b.time_ms));
        MotorTrack {
            motor_id: self.motor_id.clone(),
            points,
        }
    }

    /// Returns true if the track has enough points to describe a curve.
    pub fn is_playable(&self) -> bool {
        self.points.len() >= 2
    }
}

/// A pattern made up of one or more motor tracks.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VibePattern {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_name")]
    pub name: String,
    /// The period, in milliseconds, over which point times are interpreted.
    pub duration_ms: f64,
    /// Whether the pattern repeats after the duration elapses.
    #[serde(default)]
    pub r#loop: bool,
    pub tracks: Vec<MotorTrack>,
    /// Creation time in milliseconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<u64>,
}

fn default_version() -> String {
    DEFAULT_VERSION.to_string()
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

impl VibePattern {
    /// Creates a new unnamed pattern.
    pub fn new(duration_ms: f64, r#loop: bool, tracks: Vec<MotorTrack>) -> VibePattern {
        VibePattern {
            version: default_version(),
            name: default_name(),
            duration_ms,
            r#loop,
            tracks,
            created_at: None,
        }
    }

    /// Sets the name of the pattern.
    pub fn with_name(mut self, name: &str) -> VibePattern {
        self.name = name.to_string();
        self
    }

    /// Returns the pattern duration.
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.duration_ms.max(0.0) / 1000.0)
    }

    /// Returns true if the pattern repeats.
    pub fn is_looping(&self) -> bool {
        self.r#loop
    }

    /// Returns true if at least one track has enough points to play.
    pub fn has_playable_track(&self) -> bool {
        self.tracks.iter().any(MotorTrack::is_playable)
    }

    /// Returns a copy of the pattern with every track sorted by time.
    pub fn sorted(&self) -> VibePattern {
        VibePattern {
            tracks: self.tracks.iter().map(MotorTrack::sorted).collect(),
            ..self.clone()
        }
    }

    /// Checks the structural requirements of the pattern. Intensities outside of the 0-100
    /// range are allowed here and clamped on output.
    pub fn validate(&self) -> Result<(), PatternError> {
        if !self.duration_ms.is_finite() || self.duration_ms <= 0.0 {
            return Err(PatternError::InvalidDuration(self.duration_ms));
        }

        if self.tracks.is_empty() {
            return Err(PatternError::NoTracks);
        }

        for (track_index, track) in self.tracks.iter().enumerate() {
            for (point_index, point) in track.points.iter().enumerate() {
                if !point.time_ms.is_finite()
                    || point.time_ms < 0.0
                    || !point.intensity.is_finite()
                {
                    return Err(PatternError::InvalidPoint {
                        track: track_index,
                        point: point_index,
                    });
                }
            }
        }

        Ok(())
    }
}

impl fmt::Display for VibePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (v{}, duration: {}, loop: {}, tracks: {})",
            self.name,
            self.version,
            util::format_millis(self.duration_ms),
            self.r#loop,
            self.tracks.len()
        )
    }
}

/// Clamps an authored intensity into the valid range.
pub fn clamp_intensity(intensity: f64) -> f64 {
    if intensity.is_nan() {
        return MIN_INTENSITY;
    }
    intensity.clamp(MIN_INTENSITY, MAX_INTENSITY)
}

#[cfg(test)]
mod test {
    use crate::error::PatternError;

    use super::{clamp_intensity, MotorTrack, PatternPoint, VibePattern};

    fn points(raw: &[(f64, f64)]) -> Vec<PatternPoint> {
        raw.iter()
            .map(|(time_ms, intensity)| PatternPoint::new(*time_ms, *intensity))
            .collect()
    }

    #[test]
    fn test_sorted_is_stable() {
        let track = MotorTrack::new(
            "0",
            points(&[(500.0, 1.0), (100.0, 2.0), (500.0, 3.0), (0.0, 4.0)]),
        );
        let sorted = track.sorted();

        assert_eq!(
            sorted.points,
            points(&[(0.0, 4.0), (100.0, 2.0), (500.0, 1.0), (500.0, 3.0)])
        );
        // The original is untouched.
        assert_eq!(track.points[0], PatternPoint::new(500.0, 1.0));
    }

    #[test]
    fn test_playable_track() {
        let pattern = VibePattern::new(
            1000.0,
            false,
            vec![
                MotorTrack::new("0", points(&[(0.0, 10.0)])),
                MotorTrack::new("1", vec![]),
            ],
        );
        assert!(!pattern.has_playable_track());

        let pattern = VibePattern::new(
            1000.0,
            false,
            vec![
                MotorTrack::new("0", points(&[(0.0, 10.0)])),
                MotorTrack::new("1", points(&[(0.0, 10.0), (10.0, 20.0)])),
            ],
        );
        assert!(pattern.has_playable_track());
    }

    #[test]
    fn test_validate() {
        let track = MotorTrack::new("0", points(&[(0.0, 0.0), (10.0, 100.0)]));

        assert!(VibePattern::new(10.0, false, vec![track.clone()])
            .validate()
            .is_ok());
        assert!(matches!(
            VibePattern::new(0.0, false, vec![track.clone()]).validate(),
            Err(PatternError::InvalidDuration(_))
        ));
        assert!(matches!(
            VibePattern::new(f64::NAN, false, vec![track.clone()]).validate(),
            Err(PatternError::InvalidDuration(_))
        ));
        assert!(matches!(
            VibePattern::new(10.0, false, vec![]).validate(),
            Err(PatternError::NoTracks)
        ));

        let bad = MotorTrack::new("0", points(&[(0.0, 0.0), (-1.0, 50.0)]));
        assert!(matches!(
            VibePattern::new(10.0, false, vec![track, bad]).validate(),
            Err(PatternError::InvalidPoint { track: 1, point: 1 })
        ));
    }

    #[test]
    fn test_parse_json_schema() {
        let json = r#"{
            "version": "1.0",
            "name": "Live",
            "durationMs": 15000,
            "loop": true,
            "tracks": [
                { "motorId": "0", "points": [ { "timeMs": 10.5, "intensity": 40 } ] }
            ],
            "createdAt": 1700000000000
        }"#;

        let pattern: VibePattern = serde_json::from_str(json).expect("pattern should parse");
        assert_eq!(pattern.name, "Live");
        assert_eq!(pattern.duration_ms, 15000.0);
        assert!(pattern.is_looping());
        assert_eq!(pattern.tracks[0].motor_id, "0");
        assert_eq!(pattern.tracks[0].points, points(&[(10.5, 40.0)]));
        assert_eq!(pattern.created_at, Some(1_700_000_000_000));
    }

    #[test]
    fn test_parse_defaults() {
        let json = r#"{ "durationMs": 1000, "tracks": [ { "motorId": "a" } ] }"#;

        let pattern: VibePattern = serde_json::from_str(json).expect("pattern should parse");
        assert_eq!(pattern.version, "1.0");
        assert_eq!(pattern.name, "Untitled");
        assert!(!pattern.is_looping());
        assert!(pattern.tracks[0].points.is_empty());
        assert_eq!(pattern.created_at, None);
    }

    #[test]
    fn test_clamp_intensity() {
        assert_eq!(clamp_intensity(-5.0), 0.0);
        assert_eq!(clamp_intensity(50.0), 50.0);
        assert_eq!(clamp_intensity(104.2), 100.0);
        assert_eq!(clamp_intensity(f64::NAN), 0.0);
    }
}

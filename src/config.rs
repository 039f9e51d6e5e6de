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
use std::{error::Error, fs, path::Path, sync::Arc};

use config::{Config, Environment, File, FileFormat};
use tracing::info;

use crate::{controller::Controller, device, pattern::VibePattern};

mod error;
mod player;

pub use error::ConfigError;
pub use player::Player;

/// Environment variables with this prefix override player config fields, e.g.
/// VIBECANVAS_SERVER_ADDRESS.
pub const ENV_PREFIX: &str = "VIBECANVAS";

/// Loads the player config from a YAML file, applying environment overrides.
pub fn load_player(path: &Path) -> Result<Player, ConfigError> {
    load_player_with_env(path, ENV_PREFIX)
}

fn load_player_with_env(path: &Path, env_prefix: &str) -> Result<Player, ConfigError> {
    Ok(Config::builder()
        .add_source(File::from(path).format(FileFormat::Yaml))
        .add_source(Environment::with_prefix(env_prefix))
        .build()?
        .try_deserialize()?)
}

/// Parses a pattern from a JSON or YAML file, picked by extension. The pattern is not validated.
pub fn parse_pattern(path: &Path) -> Result<VibePattern, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    match path.extension().and_then(|extension| extension.to_str()) {
        Some("json") => Ok(serde_json::from_str(&contents)?),
        Some("yaml") | Some("yml") => Ok(serde_yml::from_str(&contents)?),
        _ => Err(ConfigError::UnknownFormat(path.to_path_buf())),
    }
}

/// Initializes the player and controller from the given config file and returns the controller.
/// The controller owns the player, which can be waited on until it exits.
pub fn init_player_and_controller(player_path: &Path) -> Result<Controller, Box<dyn Error>> {
    let player_config = load_player(player_path)?;
    let config_dir = player_path.parent().unwrap_or(Path::new("."));
    let pattern_path = player_config.pattern_path(config_dir);
    let pattern = parse_pattern(&pattern_path)?;
    pattern.validate()?;
    info!(
        pattern = %pattern,
        path = %pattern_path.display(),
        "Loaded pattern."
    );

    let transport = device::get_transport(
        player_config.server_address(),
        player_config.client_name(),
    )?;
    let player = Arc::new(crate::player::Player::new(
        transport,
        player_config.server_address(),
        player_config.tick_interval()?,
        player_config.scan_window()?,
    )?);

    Ok(Controller::new(
        player,
        pattern,
        Arc::new(crate::controller::keyboard::Driver::new()),
    ))
}

#[cfg(test)]
mod test {
    use std::{fs, time::Duration};

    use tempfile::TempDir;

    use super::{load_player, load_player_with_env, parse_pattern, ConfigError};

    const JSON_PATTERN: &str = r#"{
        "name": "Wave",
        "durationMs": 2000,
        "loop": true,
        "tracks": [
            { "motorId": "0", "points": [ { "timeMs": 0, "intensity": 0 }, { "timeMs": 1000, "intensity": 80 } ] }
        ]
    }"#;

    const YAML_PATTERN: &str = r#"
name: Pulse
durationMs: 500
tracks:
  - motorId: "0"
    points:
      - timeMs: 0
        intensity: 100
      - timeMs: 250
        intensity: 0
"#;

    #[test]
    fn test_parse_pattern() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;

        let json_path = dir.path().join("wave.json");
        fs::write(&json_path, JSON_PATTERN)?;
        let pattern = parse_pattern(&json_path)?;
        assert_eq!(pattern.name, "Wave");
        assert!(pattern.is_looping());
        assert_eq!(pattern.tracks[0].points.len(), 2);
        assert_eq!(pattern.version, "1.0");

        let yaml_path = dir.path().join("pulse.yml");
        fs::write(&yaml_path, YAML_PATTERN)?;
        let pattern = parse_pattern(&yaml_path)?;
        assert_eq!(pattern.name, "Pulse");
        assert!(!pattern.is_looping());
        assert_eq!(pattern.duration(), Duration::from_millis(500));

        let text_path = dir.path().join("pulse.txt");
        fs::write(&text_path, YAML_PATTERN)?;
        assert!(matches!(
            parse_pattern(&text_path),
            Err(ConfigError::UnknownFormat(_))
        ));

        assert!(matches!(
            parse_pattern(&dir.path().join("missing.json")),
            Err(ConfigError::Read { .. })
        ));

        let broken_path = dir.path().join("broken.json");
        fs::write(&broken_path, "{ \"durationMs\": ")?;
        assert!(matches!(
            parse_pattern(&broken_path),
            Err(ConfigError::Json(_))
        ));

        Ok(())
    }

    #[test]
    fn test_load_player() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("vibecanvas.yaml");
        fs::write(
            &path,
            "server_address: ws://127.0.0.1:9999\ntick_interval: 20ms\npattern: wave.json\n",
        )?;

        let player = load_player(&path)?;
        assert_eq!(player.tick_interval()?, Duration::from_millis(20));
        assert_eq!(player.pattern_path(dir.path()), dir.path().join("wave.json"));

        assert!(matches!(
            load_player(&dir.path().join("missing.yaml")),
            Err(ConfigError::Load(_))
        ));

        Ok(())
    }

    #[test]
    fn test_load_player_env_override() -> Result<(), Box<dyn std::error::Error>> {
        let dir = TempDir::new()?;
        let path = dir.path().join("vibecanvas.yaml");
        fs::write(&path, "server_address: ws://127.0.0.1:9999\npattern: wave.json\n")?;

        // A prefix no other test uses, since the environment is shared.
        std::env::set_var("VIBECANVAS_ENV_TEST_SERVER_ADDRESS", "mock://override");
        let player = load_player_with_env(&path, "VIBECANVAS_ENV_TEST")?;
        std::env::remove_var("VIBECANVAS_ENV_TEST_SERVER_ADDRESS");

        assert_eq!(player.server_address(), "mock://override");

        Ok(())
    }
}

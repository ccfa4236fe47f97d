use std::{path::Path, str::FromStr, time::Duration};

use speed_tracker_lib::{trip_session::DEFAULT_SPEED_LIMIT_KMH, SpeedUnit};

use crate::TrackerError;

#[derive(Debug, Clone, PartialEq)]
pub struct TrackerConfig {
    pub speed_limit_kmh: f64,
    pub speed_unit: SpeedUnit,
    /// How often observers are prompted to re-read the elapsed duration.
    pub tick_interval: Duration,
    /// Playback rate for recorded drives. 2.0 replays twice as fast.
    pub replay_speed: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            speed_limit_kmh: DEFAULT_SPEED_LIMIT_KMH,
            speed_unit: SpeedUnit::Kmh,
            tick_interval: Duration::from_secs(1),
            replay_speed: 1.,
        }
    }
}

impl TrackerConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|err| TrackerError::Config(format!("Failed to read config file {:?}: {}", path, err)))?;
        Self::parse(&text)
    }

    /// Parses `key = value` lines on top of the defaults. `#` starts a comment line.
    pub fn parse(text: &str) -> Result<Self, TrackerError> {
        let mut config = Self::default();

        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let Some((key, value)) = line.split_once('=') else {
                return Err(TrackerError::Config(format!("Line {}: expected key = value, got '{}'", number + 1, line)));
            };
            let (key, value) = (key.trim(), value.trim());

            match key {
                "speed_limit_kmh" => config.speed_limit_kmh = parse_value(key, value)?,
                "speed_unit" => {
                    config.speed_unit = SpeedUnit::from_str(value).map_err(|err| TrackerError::Config(err.to_string()))?
                }
                "tick_interval_ms" => config.tick_interval = Duration::from_millis(parse_value(key, value)?),
                "replay_speed" => config.replay_speed = parse_value(key, value)?,
                _ => {
                    tracing::warn!("Unknown config key: {}", key);
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TrackerError> {
        validate_speed_limit(self.speed_limit_kmh)?;
        if !self.replay_speed.is_finite() || self.replay_speed <= 0. {
            return Err(TrackerError::Config(format!("replay_speed must be positive, got {}", self.replay_speed)));
        }
        if self.tick_interval.is_zero() {
            return Err(TrackerError::Config("tick_interval_ms must be at least 1".to_string()));
        }
        Ok(())
    }
}

/// A limit must be a positive finite km/h value, otherwise the warning could never fire.
pub fn validate_speed_limit(limit_kmh: f64) -> Result<(), TrackerError> {
    if !limit_kmh.is_finite() || limit_kmh <= 0. {
        return Err(TrackerError::Config(format!("speed_limit_kmh must be positive, got {}", limit_kmh)));
    }
    Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, TrackerError> {
    value
        .parse()
        .map_err(|_| TrackerError::Config(format!("Invalid value for {}: '{}'", key, value)))
}

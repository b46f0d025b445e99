//! Player configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Per-player configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Interval between ad progress callbacks in milliseconds
    pub ad_progress_interval_ms: u64,
    /// Interval between time update events in milliseconds (0 = disabled)
    pub time_update_interval_ms: u64,
    /// Start playback as soon as a committed source is ready
    pub play_when_ready: bool,
    /// Keep playing when the app moves to the background
    pub stays_active_in_background: bool,
    /// Keep pitch constant when the playback rate changes
    pub preserves_pitch: bool,
    /// Volume applied at construction (0.0 - 1.0)
    pub initial_volume: f32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            ad_progress_interval_ms: 250,
            time_update_interval_ms: 0,
            play_when_ready: true,
            stays_active_in_background: false,
            preserves_pitch: true,
            initial_volume: 1.0,
        }
    }
}

impl PlayerConfig {
    /// Parse a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: PlayerConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        if self.ad_progress_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "ad_progress_interval_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.initial_volume) {
            return Err(Error::InvalidConfig(format!(
                "initial_volume {} is outside 0.0..=1.0",
                self.initial_volume
            )));
        }
        Ok(())
    }

    pub fn ad_progress_interval(&self) -> Duration {
        Duration::from_millis(self.ad_progress_interval_ms)
    }

    /// `None` when time updates are disabled
    pub fn time_update_interval(&self) -> Option<Duration> {
        (self.time_update_interval_ms > 0).then(|| Duration::from_millis(self.time_update_interval_ms))
    }
}

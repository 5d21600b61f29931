//! Configuration management for runtime parameter tuning
//!
//! Capture, detection, calibration and session parameters are loaded from a
//! JSON file so they can be adjusted without recompiling. Every section has
//! defaults and missing fields fall back to them.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Default location of the bundled configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "assets/timing_config.json";

/// Complete application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub audio: AudioConfig,
    pub detection: DetectionConfig,
    pub calibration: CalibrationConfig,
    pub session: SessionConfig,
}

/// Audio capture configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    /// Requested capture sample rate in Hz
    pub sample_rate: u32,
    /// Requested frames per callback
    pub buffer_size: u32,
    /// Pre-allocated frames in flight between the audio and dispatcher threads
    pub queue_capacity: usize,
    /// Explicit input device index; `None` selects the preferred device
    pub input_device: Option<usize>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            buffer_size: 256,
            queue_capacity: 100,
            input_device: None,
        }
    }
}

/// Onset detection parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectionConfig {
    /// RMS level above which a buffer counts as an onset
    pub threshold: f32,
    /// Minimum time between two triggers
    pub min_retrigger_interval_ms: f64,
    /// Input latency subtracted from every trigger time
    pub latency_offset_ms: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            threshold: 0.015,
            min_retrigger_interval_ms: 50.0,
            latency_offset_ms: 0.0,
        }
    }
}

/// Calibration constants
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Noise measurement window used when none is given explicitly
    pub noise_window_ms: u64,
    /// Multiplier applied to the noise floor
    pub threshold_multiplier: f32,
    /// Margin added on top of the scaled noise floor
    pub threshold_margin: f32,
    /// Typical human reaction time removed from the measured offset
    pub reaction_baseline_ms: f64,
    /// Offsets further than this from the nearest click are discarded
    pub sanity_window_ms: f64,
    /// Minimum number of valid click/trigger pairs
    pub min_samples: usize,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            noise_window_ms: 1000,
            threshold_multiplier: 3.0,
            threshold_margin: 0.01,
            reaction_baseline_ms: 140.0,
            sanity_window_ms: 500.0,
            min_samples: 3,
        }
    }
}

/// Practice session parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Maximum number of sessions kept by the session store
    pub store_capacity: usize,
    /// Bars generated when a request does not specify a length
    pub default_bars: u32,
    /// Onsets are matched to slots within `factor * good_window_ms`
    pub capture_window_factor: f64,
    /// Apply streak multipliers to the score
    pub streak_bonus: bool,
    /// Silence before the first scheduled note
    pub count_in_ms: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            store_capacity: 50,
            default_bars: 8,
            capture_window_factor: 2.0,
            streak_bonus: true,
            count_in_ms: 0.0,
        }
    }
}

impl AppConfig {
    /// Load configuration from a JSON file
    ///
    /// Never fails: an unreadable or malformed file logs a warning and
    /// yields the default configuration.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    log::info!("[Config] Loaded configuration from {:?}", path.as_ref());
                    config
                }
                Err(err) => {
                    log::warn!(
                        "[Config] Failed to parse JSON from {:?}: {}. Using defaults.",
                        path.as_ref(),
                        err
                    );
                    Self::default()
                }
            },
            Err(err) => {
                log::warn!(
                    "[Config] Failed to read config file {:?}: {}. Using defaults.",
                    path.as_ref(),
                    err
                );
                Self::default()
            }
        }
    }

    /// Load from `path` when given, otherwise from [`DEFAULT_CONFIG_PATH`].
    pub fn load(path: Option<&Path>) -> Self {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load_from_file(DEFAULT_CONFIG_PATH),
        }
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.audio.sample_rate, 48_000);
        assert_eq!(config.audio.buffer_size, 256);
        assert_eq!(config.detection.threshold, 0.015);
        assert_eq!(config.detection.min_retrigger_interval_ms, 50.0);
        assert_eq!(config.calibration.reaction_baseline_ms, 140.0);
        assert_eq!(config.session.store_capacity, 50);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let json = r#"{ "detection": { "threshold": 0.05 } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.detection.threshold, 0.05);
        assert_eq!(config.detection.min_retrigger_interval_ms, 50.0);
        assert_eq!(config.audio, AudioConfig::default());
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let config = AppConfig::load_from_file("/nonexistent/timing_config.json");
        assert_eq!(config, AppConfig::default());
    }

    #[test]
    fn test_save_and_reload() {
        let path = std::env::temp_dir().join(format!(
            "timing-config-{}.json",
            std::process::id()
        ));
        let mut config = AppConfig::default();
        config.session.default_bars = 4;
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path);
        assert_eq!(loaded.session.default_bars, 4);
        let _ = std::fs::remove_file(path);
    }
}

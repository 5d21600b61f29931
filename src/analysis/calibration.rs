//! Threshold and latency calibration math.
//!
//! Pure functions; the detector applies the results.

use serde::{Deserialize, Serialize};

use crate::config::CalibrationConfig;
use crate::error::CalibrationError;

/// Bounds for a detection threshold.
pub const MIN_THRESHOLD: f32 = 0.001;
pub const MAX_THRESHOLD: f32 = 1.0;

/// Result of a noise-floor based threshold calibration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCalibration {
    pub noise_floor: f32,
    pub suggested_threshold: f32,
}

/// `floor * multiplier + margin`, clamped to the valid threshold range.
pub fn suggest_threshold(noise_floor: f32, config: &CalibrationConfig) -> ThresholdCalibration {
    let suggested = noise_floor * config.threshold_multiplier + config.threshold_margin;
    ThresholdCalibration {
        noise_floor,
        suggested_threshold: suggested.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
    }
}

/// Result of a latency calibration run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyCalibration {
    /// Mean offset of triggers from their nearest click
    pub average_offset_ms: f64,
    /// Average offset minus the reaction baseline
    pub suggested_latency_offset_ms: f64,
    pub sample_count: usize,
}

impl LatencyCalibration {
    pub fn zero() -> Self {
        Self::default()
    }
}

/// Estimate system latency from click times and the player's trigger times.
///
/// Each trigger is paired with its nearest click, not by position, since a
/// player may miss or double a click. Offsets outside the sanity window are
/// discarded.
pub fn estimate_latency(
    reference_times: &[f64],
    trigger_times: &[f64],
    config: &CalibrationConfig,
) -> Result<LatencyCalibration, CalibrationError> {
    if reference_times
        .iter()
        .chain(trigger_times)
        .any(|time| !time.is_finite())
    {
        return Err(CalibrationError::InvalidInput {
            reason: "timestamps must be finite".to_string(),
        });
    }

    let offsets: Vec<f64> = trigger_times
        .iter()
        .filter_map(|&trigger| {
            let nearest = reference_times.iter().copied().min_by(|a, b| {
                (a - trigger).abs().total_cmp(&(b - trigger).abs())
            })?;
            let offset = trigger - nearest;
            (offset.abs() <= config.sanity_window_ms).then_some(offset)
        })
        .collect();

    if offsets.len() < config.min_samples.max(1) {
        return Err(CalibrationError::InsufficientSamples {
            required: config.min_samples.max(1),
            collected: offsets.len(),
        });
    }

    let average = offsets.iter().sum::<f64>() / offsets.len() as f64;
    Ok(LatencyCalibration {
        average_offset_ms: average,
        suggested_latency_offset_ms: average - config.reaction_baseline_ms,
        sample_count: offsets.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suggests_scaled_floor_plus_margin() {
        let result = suggest_threshold(0.004, &CalibrationConfig::default());
        assert!((result.suggested_threshold - 0.022).abs() < 1e-6);
        assert_eq!(result.noise_floor, 0.004);
    }

    #[test]
    fn suggestion_is_clamped() {
        let config = CalibrationConfig::default();
        assert_eq!(suggest_threshold(2.0, &config).suggested_threshold, MAX_THRESHOLD);
        let quiet = CalibrationConfig {
            threshold_margin: 0.0,
            ..config
        };
        assert_eq!(suggest_threshold(0.0, &quiet).suggested_threshold, MIN_THRESHOLD);
    }

    #[test]
    fn latency_from_nearest_clicks() {
        let clicks = [0.0, 500.0, 1000.0, 1500.0, 2000.0];
        let triggers = [650.0, 1140.0, 1660.0, 2155.0];
        let result = estimate_latency(&clicks, &triggers, &CalibrationConfig::default()).unwrap();
        assert_eq!(result.sample_count, 4);
        assert!((result.average_offset_ms - 151.25).abs() < 1e-9);
        assert!((result.suggested_latency_offset_ms - 11.25).abs() < 1e-9);
    }

    #[test]
    fn doubled_and_missed_clicks_still_pair_by_proximity() {
        let clicks = [0.0, 1000.0, 2000.0, 3000.0];
        let triggers = [150.0, 160.0, 2150.0, 3150.0];
        let result = estimate_latency(&clicks, &triggers, &CalibrationConfig::default()).unwrap();
        assert!((result.average_offset_ms - 152.5).abs() < 1e-9);
    }

    #[test]
    fn outliers_beyond_sanity_window_are_dropped() {
        let config = CalibrationConfig {
            sanity_window_ms: 100.0,
            ..CalibrationConfig::default()
        };
        let clicks = [0.0, 1000.0, 2000.0, 3000.0];
        let triggers = [50.0, 1050.0, 2450.0, 3050.0];
        let result = estimate_latency(&clicks, &triggers, &config).unwrap();
        assert_eq!(result.sample_count, 3);
        assert_eq!(result.average_offset_ms, 50.0);
    }

    #[test]
    fn too_few_pairs_is_an_error() {
        let err = estimate_latency(&[0.0, 500.0], &[150.0, 650.0], &CalibrationConfig::default())
            .unwrap_err();
        assert_eq!(
            err,
            CalibrationError::InsufficientSamples {
                required: 3,
                collected: 2
            }
        );
        assert!(estimate_latency(&[], &[1.0, 2.0, 3.0], &CalibrationConfig::default()).is_err());
    }
}

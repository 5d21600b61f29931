//! Hit classification against timing windows.
//!
//! `classify` is pure: identical inputs always produce identical outputs.

use serde::{Deserialize, Serialize};

/// Quality label for a resolved expected slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitQuality {
    Perfect,
    Good,
    Early,
    Late,
    Miss,
}

impl HitQuality {
    pub fn base_score(self) -> u32 {
        match self {
            HitQuality::Perfect => 100,
            HitQuality::Good => 50,
            HitQuality::Early | HitQuality::Late => 10,
            HitQuality::Miss => 0,
        }
    }

    /// Perfect and good hits keep a streak alive.
    pub fn extends_streak(self) -> bool {
        matches!(self, HitQuality::Perfect | HitQuality::Good)
    }
}

/// Symmetric tolerance windows in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitWindows {
    pub perfect_ms: f64,
    pub good_ms: f64,
}

impl HitWindows {
    /// Build windows; the good window never ends up narrower than the perfect one.
    pub fn new(perfect_ms: f64, good_ms: f64) -> Self {
        let perfect_ms = perfect_ms.max(0.0);
        Self {
            perfect_ms,
            good_ms: good_ms.max(perfect_ms),
        }
    }
}

/// Classification result for one expected slot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitOutcome {
    pub quality: HitQuality,
    pub base_score: u32,
    /// Signed offset (negative = early); `None` for a miss
    pub offset_ms: Option<f64>,
}

impl HitOutcome {
    pub fn miss() -> Self {
        Self {
            quality: HitQuality::Miss,
            base_score: 0,
            offset_ms: None,
        }
    }
}

/// Classify an onset against its expected time.
///
/// Window boundaries are inclusive. A missing onset, or a non-finite
/// timestamp, is a miss.
pub fn classify(expected_ms: f64, actual_ms: Option<f64>, windows: HitWindows) -> HitOutcome {
    let offset = match actual_ms {
        Some(actual) if actual.is_finite() && expected_ms.is_finite() => actual - expected_ms,
        _ => return HitOutcome::miss(),
    };

    let distance = offset.abs();
    let quality = if distance <= windows.perfect_ms {
        HitQuality::Perfect
    } else if distance <= windows.good_ms {
        HitQuality::Good
    } else if offset < 0.0 {
        HitQuality::Early
    } else {
        HitQuality::Late
    };

    HitOutcome {
        quality,
        base_score: quality.base_score(),
        offset_ms: Some(offset),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEVEL_ONE: HitWindows = HitWindows {
        perfect_ms: 80.0,
        good_ms: 150.0,
    };

    #[test]
    fn zero_offset_is_perfect_even_with_zero_windows() {
        let outcome = classify(1000.0, Some(1000.0), HitWindows::new(0.0, 0.0));
        assert_eq!(outcome.quality, HitQuality::Perfect);
        assert_eq!(outcome.base_score, 100);
    }

    #[test]
    fn boundaries_are_inclusive() {
        assert_eq!(classify(0.0, Some(80.0), LEVEL_ONE).quality, HitQuality::Perfect);
        assert_eq!(classify(0.0, Some(-80.0), LEVEL_ONE).quality, HitQuality::Perfect);
        assert_eq!(classify(0.0, Some(150.0), LEVEL_ONE).quality, HitQuality::Good);
        assert_eq!(classify(0.0, Some(-150.0), LEVEL_ONE).quality, HitQuality::Good);
        assert_eq!(classify(0.0, Some(81.0), LEVEL_ONE).quality, HitQuality::Good);
        assert_eq!(classify(0.0, Some(151.0), LEVEL_ONE).quality, HitQuality::Late);
        assert_eq!(classify(0.0, Some(-151.0), LEVEL_ONE).quality, HitQuality::Early);
    }

    #[test]
    fn level_one_scenario() {
        let perfect = classify(500.0, Some(579.0), LEVEL_ONE);
        assert_eq!(perfect.quality, HitQuality::Perfect);
        assert_eq!(perfect.offset_ms, Some(79.0));

        assert_eq!(classify(500.0, Some(581.0), LEVEL_ONE).quality, HitQuality::Good);

        let late = classify(500.0, Some(651.0), LEVEL_ONE);
        assert_eq!(late.quality, HitQuality::Late);
        assert_eq!(late.base_score, 10);
    }

    #[test]
    fn absent_onset_is_miss() {
        let outcome = classify(250.0, None, LEVEL_ONE);
        assert_eq!(outcome, HitOutcome::miss());
        assert_eq!(classify(250.0, Some(f64::NAN), LEVEL_ONE).quality, HitQuality::Miss);
    }

    #[test]
    fn classification_is_repeatable() {
        let windows = HitWindows::new(30.0, 60.0);
        for offset in [-90.0, -45.0, 0.0, 12.5, 61.0] {
            assert_eq!(
                classify(100.0, Some(100.0 + offset), windows),
                classify(100.0, Some(100.0 + offset), windows)
            );
        }
    }

    #[test]
    fn good_window_never_narrower_than_perfect() {
        let windows = HitWindows::new(50.0, 20.0);
        assert_eq!(windows.good_ms, 50.0);
    }
}

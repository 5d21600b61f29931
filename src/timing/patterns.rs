//! Rhythm pattern tables.
//!
//! Each pattern is one bar expressed as beat values (1.0 = quarter note).

use super::modes::GameMode;

pub type BarPattern = &'static [f64];

const QUARTERS: BarPattern = &[1.0, 1.0, 1.0, 1.0];
const EIGHTHS: BarPattern = &[0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5];
const TRIPLET: f64 = 0.333;
const TRIPLETS: BarPattern = &[TRIPLET; 12];
const SIXTEENTHS: BarPattern = &[0.25; 16];

const GROOVE: [&[BarPattern]; 5] = [
    &[QUARTERS],
    &[QUARTERS, &[1.0, 0.5, 0.5, 1.0, 1.0]],
    &[
        QUARTERS,
        &[1.0, 0.5, 0.5, 1.0, 1.0],
        &[0.5, 0.5, 1.0, 0.5, 0.5, 1.0],
    ],
    &[
        &[1.0, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0],
        &[0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0],
    ],
    &[EIGHTHS],
];

const SUBDIVISIONS: [&[BarPattern]; 5] = [
    &[QUARTERS],
    &[EIGHTHS],
    &[TRIPLETS],
    &[SIXTEENTHS],
    &[&[0.25, 0.25, 0.5, 0.25, 0.25, 0.5, 0.5, 0.5]],
];

const SYNCOPATION: [&[BarPattern]; 5] = [
    &[QUARTERS],
    &[&[0.5, 1.0, 0.5, 1.0, 1.0]],
    &[&[0.5, 0.5, 0.5, 1.5, 0.5, 0.5]],
    &[&[0.5, 1.5, 0.5, 1.5]],
    &[&[0.75, 0.75, 0.5, 0.75, 0.75, 0.5]],
];

/// Candidate bar patterns for a mode at a pattern complexity (1..=5).
///
/// Modes without a pattern table get the flat quarter-note bar.
pub fn candidates(mode: GameMode, complexity: u8) -> &'static [BarPattern] {
    let slot = (complexity.clamp(1, 5) - 1) as usize;
    match mode {
        GameMode::Groove => GROOVE[slot],
        GameMode::Subdivisions => SUBDIVISIONS[slot],
        GameMode::Syncopation => SYNCOPATION[slot],
        GameMode::Precision | GameMode::Endurance => &[QUARTERS],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_slot_has_candidates() {
        for mode in GameMode::ALL {
            for complexity in 1..=5 {
                assert!(!candidates(mode, complexity).is_empty());
            }
        }
    }

    #[test]
    fn grid_modes_use_quarter_notes() {
        assert_eq!(candidates(GameMode::Precision, 5), &[QUARTERS]);
        assert_eq!(candidates(GameMode::Endurance, 1), &[QUARTERS]);
    }

    #[test]
    fn out_of_range_complexity_is_clamped() {
        assert_eq!(candidates(GameMode::Subdivisions, 9), SUBDIVISIONS[4]);
        assert_eq!(candidates(GameMode::Subdivisions, 0), SUBDIVISIONS[0]);
    }
}

//! Game modes and the per-difficulty table.
//!
//! The difficulty table is the single source of truth for hit windows,
//! tempo ranges and pattern complexity.

use std::fmt;
use std::ops::RangeInclusive;

use serde::{Deserialize, Serialize};

/// Practice game mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Groove,
    Precision,
    Subdivisions,
    Endurance,
    Syncopation,
}

impl GameMode {
    pub const ALL: [GameMode; 5] = [
        GameMode::Groove,
        GameMode::Precision,
        GameMode::Subdivisions,
        GameMode::Endurance,
        GameMode::Syncopation,
    ];

    /// Parse a mode key, returning `None` for unknown names.
    pub fn parse(key: &str) -> Option<Self> {
        match key.trim().to_ascii_lowercase().as_str() {
            "groove" => Some(GameMode::Groove),
            "precision" => Some(GameMode::Precision),
            "subdivisions" => Some(GameMode::Subdivisions),
            "endurance" => Some(GameMode::Endurance),
            "syncopation" => Some(GameMode::Syncopation),
            _ => None,
        }
    }

    /// Parse a mode key, falling back to [`GameMode::Groove`] for unknown names.
    pub fn parse_or_default(key: &str) -> Self {
        Self::parse(key).unwrap_or_else(|| {
            tracing::debug!(mode = key, "unknown game mode, using groove");
            GameMode::default()
        })
    }

    pub fn key(self) -> &'static str {
        match self {
            GameMode::Groove => "groove",
            GameMode::Precision => "precision",
            GameMode::Subdivisions => "subdivisions",
            GameMode::Endurance => "endurance",
            GameMode::Syncopation => "syncopation",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            GameMode::Groove => "Groove Lock",
            GameMode::Precision => "Precision Strike",
            GameMode::Subdivisions => "Subdivision Master",
            GameMode::Endurance => "Endurance Run",
            GameMode::Syncopation => "Syncopation Challenge",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            GameMode::Groove => "Play steady quarter notes to lock into the groove. Focus on feel.",
            GameMode::Precision => {
                "Hit notes at exact beats. Timing windows get tighter as you level up."
            }
            GameMode::Subdivisions => {
                "Practice eighth notes, triplets, and sixteenths. Build your subdivision skills."
            }
            GameMode::Endurance => {
                "Keep the groove going as long as possible. Tempo gradually increases."
            }
            GameMode::Syncopation => {
                "Hit off-beat accents and syncopated patterns. Test your rhythmic independence."
            }
        }
    }
}

impl fmt::Display for GameMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Difficulty level clamped to 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "i64", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    pub const MIN: Difficulty = Difficulty(1);
    pub const MAX: Difficulty = Difficulty(5);

    /// Build a difficulty, clamping out-of-range values.
    pub fn new(level: i64) -> Self {
        Difficulty(level.clamp(1, 5) as u8)
    }

    pub fn level(self) -> u8 {
        self.0
    }

    pub fn profile(self) -> &'static DifficultyProfile {
        &DIFFICULTY_TABLE[(self.0 - 1) as usize]
    }

    /// Step the level by `delta`, clamped to the valid range.
    pub fn step(self, delta: i64) -> Self {
        Difficulty::new(self.0 as i64 + delta)
    }
}

impl Default for Difficulty {
    fn default() -> Self {
        Difficulty::MIN
    }
}

impl From<i64> for Difficulty {
    fn from(level: i64) -> Self {
        Difficulty::new(level)
    }
}

impl From<Difficulty> for u8 {
    fn from(difficulty: Difficulty) -> Self {
        difficulty.0
    }
}

/// Fixed parameters for one difficulty level.
#[derive(Debug, Clone, PartialEq)]
pub struct DifficultyProfile {
    pub level: u8,
    pub name: &'static str,
    pub perfect_window_ms: f64,
    pub good_window_ms: f64,
    pub tempo_range: RangeInclusive<u32>,
    pub pattern_complexity: u8,
}

impl DifficultyProfile {
    pub fn windows(&self) -> crate::analysis::classifier::HitWindows {
        crate::analysis::classifier::HitWindows::new(self.perfect_window_ms, self.good_window_ms)
    }
}

pub static DIFFICULTY_TABLE: [DifficultyProfile; 5] = [
    DifficultyProfile {
        level: 1,
        name: "Beginner",
        perfect_window_ms: 80.0,
        good_window_ms: 150.0,
        tempo_range: 60..=90,
        pattern_complexity: 1,
    },
    DifficultyProfile {
        level: 2,
        name: "Easy",
        perfect_window_ms: 60.0,
        good_window_ms: 120.0,
        tempo_range: 70..=100,
        pattern_complexity: 2,
    },
    DifficultyProfile {
        level: 3,
        name: "Medium",
        perfect_window_ms: 45.0,
        good_window_ms: 90.0,
        tempo_range: 80..=120,
        pattern_complexity: 3,
    },
    DifficultyProfile {
        level: 4,
        name: "Hard",
        perfect_window_ms: 30.0,
        good_window_ms: 60.0,
        tempo_range: 90..=140,
        pattern_complexity: 4,
    },
    DifficultyProfile {
        level: 5,
        name: "Expert",
        perfect_window_ms: 20.0,
        good_window_ms: 40.0,
        tempo_range: 100..=160,
        pattern_complexity: 5,
    },
];

/// Catalogue entry describing a mode for listing surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct ModeInfo {
    pub key: GameMode,
    pub name: &'static str,
    pub description: &'static str,
}

pub fn catalogue() -> Vec<ModeInfo> {
    GameMode::ALL
        .iter()
        .map(|&mode| ModeInfo {
            key: mode,
            name: mode.display_name(),
            description: mode.description(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_mode_falls_back_to_groove() {
        assert_eq!(GameMode::parse("polka"), None);
        assert_eq!(GameMode::parse_or_default("polka"), GameMode::Groove);
        assert_eq!(GameMode::parse_or_default("Syncopation"), GameMode::Syncopation);
    }

    #[test]
    fn catalogue_carries_mode_copy() {
        assert_eq!(
            GameMode::Groove.description(),
            "Play steady quarter notes to lock into the groove. Focus on feel."
        );
        let precision = catalogue()
            .into_iter()
            .find(|info| info.key == GameMode::Precision)
            .unwrap();
        assert_eq!(precision.name, "Precision Strike");
        assert_eq!(
            precision.description,
            "Hit notes at exact beats. Timing windows get tighter as you level up."
        );
    }

    #[test]
    fn difficulty_is_clamped() {
        assert_eq!(Difficulty::new(0).level(), 1);
        assert_eq!(Difficulty::new(9).level(), 5);
        assert_eq!(Difficulty::new(-3).level(), 1);
        assert_eq!(Difficulty::new(4).step(3).level(), 5);
    }

    #[test]
    fn windows_shrink_with_difficulty() {
        for pair in DIFFICULTY_TABLE.windows(2) {
            assert!(pair[1].perfect_window_ms < pair[0].perfect_window_ms);
            assert!(pair[1].good_window_ms < pair[0].good_window_ms);
        }
        for profile in DIFFICULTY_TABLE.iter() {
            assert!(profile.good_window_ms >= profile.perfect_window_ms);
        }
    }

    #[test]
    fn difficulty_deserializes_clamped() {
        let difficulty: Difficulty = serde_json::from_str("7").unwrap();
        assert_eq!(difficulty, Difficulty::MAX);
        assert_eq!(serde_json::to_string(&Difficulty::new(3)).unwrap(), "3");
    }
}

//! Schedule generation.
//!
//! Turns a mode/difficulty/tempo/bar-count request into the ordered list of
//! expected onset times for a session. Randomness (pattern choice and the
//! tempo draw when none is given) comes from an injected [`Rng`], so a seeded
//! generator reproduces a schedule exactly.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::modes::{Difficulty, GameMode};
use super::patterns::{self, BarPattern};
use crate::analysis::classifier::HitWindows;

/// Parameters for one schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default)]
    pub game_mode: GameMode,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Tempo in BPM; `None` or zero draws from the difficulty's range
    #[serde(default)]
    pub tempo_bpm: Option<u32>,
    pub duration_bars: u32,
}

impl ScheduleConfig {
    pub fn new(game_mode: GameMode, difficulty: Difficulty, tempo_bpm: Option<u32>, duration_bars: u32) -> Self {
        Self {
            game_mode,
            difficulty,
            tempo_bpm,
            duration_bars,
        }
    }
}

/// One expected onset.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedEvent {
    pub index: usize,
    pub expected_time_ms: f64,
}

/// Authoritative timeline for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub game_mode: GameMode,
    pub difficulty: Difficulty,
    pub tempo_bpm: u32,
    pub perfect_window_ms: f64,
    pub good_window_ms: f64,
    /// Flattened beat values, one per event
    pub pattern: Vec<f64>,
    pub events: Vec<ExpectedEvent>,
    /// Time at which the last event's value has elapsed
    pub duration_ms: f64,
}

impl Schedule {
    pub fn total_notes(&self) -> usize {
        self.events.len()
    }

    pub fn windows(&self) -> HitWindows {
        HitWindows::new(self.perfect_window_ms, self.good_window_ms)
    }

    pub fn beat_duration_ms(&self) -> f64 {
        beat_duration_ms(self.tempo_bpm)
    }

    pub fn expected_times(&self) -> Vec<f64> {
        self.events.iter().map(|e| e.expected_time_ms).collect()
    }
}

pub fn beat_duration_ms(tempo_bpm: u32) -> f64 {
    60_000.0 / tempo_bpm as f64
}

/// Choose a bar pattern from `candidates` given a raw draw.
///
/// The draw is reduced modulo the candidate count, so the mapping is total.
/// Returns an empty bar when there are no candidates.
pub fn pick_pattern(candidates: &[BarPattern], draw: usize) -> BarPattern {
    if candidates.is_empty() {
        return &[];
    }
    candidates[draw % candidates.len()]
}

/// Map beat values to absolute onset times starting at zero.
///
/// Returns the events and the total duration of the sequence.
pub fn pattern_to_events(pattern: &[f64], tempo_bpm: u32) -> (Vec<ExpectedEvent>, f64) {
    let beat_ms = beat_duration_ms(tempo_bpm);
    let mut time = 0.0;
    let mut events = Vec::with_capacity(pattern.len());
    for (index, value) in pattern.iter().enumerate() {
        events.push(ExpectedEvent {
            index,
            expected_time_ms: time,
        });
        time += beat_ms * value;
    }
    (events, time)
}

/// Generate a schedule. Never fails.
pub fn generate<R: Rng + ?Sized>(config: &ScheduleConfig, rng: &mut R) -> Schedule {
    let profile = config.difficulty.profile();

    let tempo_bpm = match config.tempo_bpm {
        Some(tempo) if tempo > 0 => tempo,
        _ => rng.gen_range(profile.tempo_range.clone()),
    };

    let candidates = patterns::candidates(config.game_mode, profile.pattern_complexity);
    let mut pattern = Vec::new();
    for _ in 0..config.duration_bars {
        let draw = rng.gen_range(0..candidates.len().max(1));
        pattern.extend_from_slice(pick_pattern(candidates, draw));
    }

    let (events, duration_ms) = pattern_to_events(&pattern, tempo_bpm);

    tracing::debug!(
        mode = %config.game_mode,
        difficulty = config.difficulty.level(),
        tempo_bpm,
        notes = events.len(),
        "generated schedule"
    );

    Schedule {
        game_mode: config.game_mode,
        difficulty: config.difficulty,
        tempo_bpm,
        perfect_window_ms: profile.perfect_window_ms,
        good_window_ms: profile.good_window_ms,
        pattern,
        events,
        duration_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn config(mode: GameMode, difficulty: i64, tempo: Option<u32>, bars: u32) -> ScheduleConfig {
        ScheduleConfig::new(mode, Difficulty::new(difficulty), tempo, bars)
    }

    #[test]
    fn quarter_notes_at_120_bpm() {
        let mut rng = StdRng::seed_from_u64(1);
        let schedule = generate(&config(GameMode::Precision, 1, Some(120), 1), &mut rng);
        assert_eq!(schedule.expected_times(), vec![0.0, 500.0, 1000.0, 1500.0]);
        assert_eq!(schedule.duration_ms, 2000.0);
        assert_eq!(schedule.perfect_window_ms, 80.0);
        assert_eq!(schedule.good_window_ms, 150.0);
    }

    #[test]
    fn spacing_follows_pattern_values() {
        let mut rng = StdRng::seed_from_u64(7);
        let schedule = generate(&config(GameMode::Syncopation, 4, Some(100), 3), &mut rng);
        let beat = beat_duration_ms(100);
        for i in 1..schedule.events.len() {
            let delta = schedule.events[i].expected_time_ms - schedule.events[i - 1].expected_time_ms;
            assert!((delta - beat * schedule.pattern[i - 1]).abs() < 1e-9);
        }
    }

    #[test]
    fn same_seed_same_schedule() {
        let request = config(GameMode::Groove, 3, None, 8);
        let a = generate(&request, &mut StdRng::seed_from_u64(42));
        let b = generate(&request, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn omitted_or_zero_tempo_draws_from_range() {
        let mut rng = StdRng::seed_from_u64(3);
        for tempo in [None, Some(0)] {
            let schedule = generate(&config(GameMode::Groove, 5, tempo, 1), &mut rng);
            assert!((100..=160).contains(&schedule.tempo_bpm));
        }
    }

    #[test]
    fn zero_bars_is_empty() {
        let mut rng = StdRng::seed_from_u64(0);
        let schedule = generate(&config(GameMode::Groove, 2, Some(90), 0), &mut rng);
        assert_eq!(schedule.total_notes(), 0);
        assert_eq!(schedule.duration_ms, 0.0);
    }

    #[test]
    fn bars_concatenate_chosen_patterns() {
        let mut rng = StdRng::seed_from_u64(11);
        let schedule = generate(&config(GameMode::Subdivisions, 4, Some(80), 2), &mut rng);
        assert_eq!(schedule.total_notes(), 32);
    }

    #[test]
    fn pick_pattern_is_pure() {
        let candidates = patterns::candidates(GameMode::Groove, 3);
        assert_eq!(pick_pattern(candidates, 1), candidates[1]);
        assert_eq!(pick_pattern(candidates, 4), candidates[1]);
        assert!(pick_pattern(&[], 2).is_empty());
    }
}

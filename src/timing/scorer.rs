//! Session scoring, coaching tips and difficulty recommendation.
//!
//! Statistics are always recomputed from the full hit list.

use serde::{Deserialize, Serialize};

use super::modes::Difficulty;
use super::session::HitRecord;
use crate::analysis::classifier::HitQuality;

/// Streak thresholds and the multiplier they unlock, ascending.
pub const STREAK_MULTIPLIERS: [(u32, f64); 5] =
    [(5, 1.5), (10, 2.0), (20, 2.5), (50, 3.0), (100, 4.0)];

/// Multiplier for a streak length (1.0 below the first threshold).
pub fn streak_multiplier(streak: u32) -> f64 {
    STREAK_MULTIPLIERS
        .iter()
        .rev()
        .find(|(threshold, _)| streak >= *threshold)
        .map(|(_, multiplier)| *multiplier)
        .unwrap_or(1.0)
}

/// Aggregate statistics for a finished session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub total_notes: u32,
    pub perfect_hits: u32,
    pub good_hits: u32,
    pub early_hits: u32,
    pub late_hits: u32,
    pub missed_notes: u32,
    pub best_streak: u32,
    pub final_streak: u32,
    /// Mean offset over perfect and good hits, two decimals
    pub average_timing_ms: f64,
    /// One decimal
    pub accuracy_percentage: f64,
    /// One decimal
    pub perfect_percentage: f64,
    pub total_score: u64,
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

fn percentage(part: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round_to(part as f64 / total as f64 * 100.0, 1)
}

/// Score a hit list with streak multipliers enabled.
pub fn score(hits: &[HitRecord]) -> SessionStats {
    score_with(hits, true)
}

/// Score a hit list, optionally without streak multipliers.
///
/// Hits must be in `note_index` order. The multiplier for a hit uses the
/// streak count after that hit has been applied.
pub fn score_with(hits: &[HitRecord], streak_bonus: bool) -> SessionStats {
    let mut stats = SessionStats::default();
    let mut current_streak = 0u32;
    let mut offset_sum = 0.0;
    let mut offset_count = 0u32;

    for hit in hits {
        match hit.quality {
            HitQuality::Perfect => stats.perfect_hits += 1,
            HitQuality::Good => stats.good_hits += 1,
            HitQuality::Early => stats.early_hits += 1,
            HitQuality::Late => stats.late_hits += 1,
            HitQuality::Miss => stats.missed_notes += 1,
        }

        if hit.quality.extends_streak() {
            current_streak += 1;
            if let Some(offset) = hit.offset_ms {
                offset_sum += offset;
                offset_count += 1;
            }
        } else {
            current_streak = 0;
        }

        let contribution = if streak_bonus && current_streak > 0 {
            (hit.base_score as f64 * streak_multiplier(current_streak)) as u64
        } else {
            hit.base_score as u64
        };
        stats.total_score += contribution;
        stats.best_streak = stats.best_streak.max(current_streak);
    }

    stats.total_notes = stats.perfect_hits
        + stats.good_hits
        + stats.early_hits
        + stats.late_hits
        + stats.missed_notes;
    stats.final_streak = current_streak;
    stats.average_timing_ms = if offset_count == 0 {
        0.0
    } else {
        round_to(offset_sum / offset_count as f64, 2)
    };
    stats.accuracy_percentage = percentage(stats.perfect_hits + stats.good_hits, stats.total_notes);
    stats.perfect_percentage = percentage(stats.perfect_hits, stats.total_notes);
    stats
}

/// Coaching tips derived from aggregate statistics. Never empty.
pub fn practice_tips(stats: &SessionStats) -> Vec<String> {
    let mut tips = Vec::new();

    if stats.early_hits > stats.late_hits * 2 {
        tips.push("You're rushing! Try to relax and let the beat come to you.".to_string());
    } else if stats.late_hits > stats.early_hits * 2 {
        tips.push("You're dragging behind the beat. Focus on anticipating the click.".to_string());
    }

    if stats.perfect_percentage >= 80.0 {
        tips.push("Excellent precision! Consider increasing the difficulty or tempo.".to_string());
    } else if stats.perfect_percentage < 30.0 {
        tips.push("Focus on the first beat of each measure to anchor your timing.".to_string());
    }

    if stats.best_streak >= 20 {
        tips.push(format!(
            "Great streak of {}! Consistency is key.",
            stats.best_streak
        ));
    }

    if stats.average_timing_ms.abs() > 30.0 {
        let direction = if stats.average_timing_ms < 0.0 {
            "early"
        } else {
            "late"
        };
        tips.push(format!(
            "Your average timing is {:.0}ms {}. Work on centering your feel.",
            stats.average_timing_ms.abs(),
            direction
        ));
    }

    if tips.is_empty() {
        tips.push("Keep practicing! Consistent timing takes time to develop.".to_string());
    }
    tips
}

/// Recommend the next difficulty from a recent accuracy percentage.
pub fn recommend_difficulty(recent_accuracy: f64, current: Difficulty) -> Difficulty {
    if recent_accuracy >= 90.0 {
        current.step(1)
    } else if recent_accuracy >= 75.0 {
        current
    } else if recent_accuracy >= 50.0 {
        current.step(-1)
    } else {
        current.step(-2)
    }
}

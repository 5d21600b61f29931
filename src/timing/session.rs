//! Practice session lifecycle.
//!
//! A session moves `Idle -> Scheduled -> Active -> Completed` and never goes
//! back. While active it resolves each expected slot exactly once, either with
//! the onset matched to it or as a timeout miss, so hit records always come
//! out in `note_index` order.

use rand::Rng;
use serde::{Deserialize, Serialize};

use super::schedule::{self, Schedule, ScheduleConfig};
use super::scorer::{self, SessionStats};
use crate::analysis::classifier::{classify, HitQuality};
use crate::analysis::onset::OnsetEvent;
use crate::config::SessionConfig;
use crate::error::SessionError;

/// Resolution of one expected slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub note_index: usize,
    pub expected_time_ms: f64,
    /// `None` for a timeout miss
    pub actual_time_ms: Option<f64>,
    /// Signed offset, negative = early
    pub offset_ms: Option<f64>,
    pub quality: HitQuality,
    pub base_score: u32,
}

impl HitRecord {
    /// Classify `actual_ms` against an expected slot.
    pub fn resolve(
        note_index: usize,
        expected_time_ms: f64,
        actual_time_ms: Option<f64>,
        windows: crate::analysis::classifier::HitWindows,
    ) -> Self {
        let outcome = classify(expected_time_ms, actual_time_ms, windows);
        Self {
            note_index,
            expected_time_ms,
            actual_time_ms: outcome.offset_ms.and(actual_time_ms),
            offset_ms: outcome.offset_ms,
            quality: outcome.quality,
            base_score: outcome.base_score,
        }
    }
}

/// One raw hit reported across the web boundary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HitSubmission {
    pub note_index: usize,
    #[serde(default)]
    pub hit_time_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Scheduled,
    Active,
    Completed,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Scheduled => "scheduled",
            SessionState::Active => "active",
            SessionState::Completed => "completed",
        }
    }
}

/// Tunables for matching and scoring.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSettings {
    pub capture_window_factor: f64,
    pub streak_bonus: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            capture_window_factor: config.capture_window_factor,
            streak_bonus: config.streak_bonus,
        }
    }
}

pub struct TimingSession {
    state: SessionState,
    settings: SessionSettings,
    schedule: Option<Schedule>,
    start_time_ms: f64,
    next_slot: usize,
    hits: Vec<HitRecord>,
    stray_onsets: u32,
    stats: Option<SessionStats>,
}

impl TimingSession {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            state: SessionState::Idle,
            settings,
            schedule: None,
            start_time_ms: 0.0,
            next_slot: 0,
            hits: Vec::new(),
            stray_onsets: 0,
            stats: None,
        }
    }

    /// Start directly in `Scheduled` from an existing schedule.
    pub fn from_schedule(schedule: Schedule, settings: SessionSettings) -> Self {
        let mut session = Self::new(settings);
        session.hits.reserve(schedule.total_notes());
        session.schedule = Some(schedule);
        session.state = SessionState::Scheduled;
        session
    }

    fn transition(&mut self, from: SessionState, to: SessionState) -> Result<(), SessionError> {
        if self.state != from {
            return Err(SessionError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        tracing::debug!(from = from.name(), to = to.name(), "session transition");
        self.state = to;
        Ok(())
    }

    /// Generate the schedule. `Idle -> Scheduled`.
    pub fn schedule<R: Rng + ?Sized>(
        &mut self,
        config: &ScheduleConfig,
        rng: &mut R,
    ) -> Result<&Schedule, SessionError> {
        self.transition(SessionState::Idle, SessionState::Scheduled)?;
        let generated = schedule::generate(config, rng);
        self.hits.reserve(generated.total_notes());
        Ok(self.schedule.insert(generated))
    }

    /// Anchor the schedule at `start_time_ms` on the detector clock. `Scheduled -> Active`.
    pub fn begin(&mut self, start_time_ms: f64) -> Result<(), SessionError> {
        self.transition(SessionState::Scheduled, SessionState::Active)?;
        self.start_time_ms = start_time_ms;
        Ok(())
    }

    fn require_active(&self, to: SessionState) -> Result<(), SessionError> {
        if self.state != SessionState::Active {
            return Err(SessionError::InvalidTransition {
                from: self.state.name(),
                to: to.name(),
            });
        }
        Ok(())
    }

    fn capture_window_ms(&self, schedule: &Schedule) -> f64 {
        schedule.good_window_ms * self.settings.capture_window_factor
    }

    /// Resolve slots whose capture window closed before `relative_ms` as misses.
    fn expire_before(&mut self, relative_ms: f64) -> Vec<HitRecord> {
        let mut resolved = Vec::new();
        let Some(schedule) = self.schedule.as_ref() else {
            return resolved;
        };
        let window = schedule.good_window_ms * self.settings.capture_window_factor;
        let windows = schedule.windows();
        while let Some(event) = schedule.events.get(self.next_slot) {
            if event.expected_time_ms + window >= relative_ms {
                break;
            }
            let record = HitRecord::resolve(event.index, event.expected_time_ms, None, windows);
            self.hits.push(record.clone());
            resolved.push(record);
            self.next_slot += 1;
        }
        resolved
    }

    /// Feed one detected onset.
    ///
    /// Returns every record resolved by this call: timed-out slots, slots the
    /// onset skipped over, and the slot it matched. An onset outside every
    /// open window is counted as stray.
    pub fn register_onset(&mut self, onset: &OnsetEvent) -> Result<Vec<HitRecord>, SessionError> {
        self.require_active(SessionState::Active)?;
        let relative = onset.trigger_time_ms - self.start_time_ms;
        let mut resolved = self.expire_before(relative);

        let Some(schedule) = self.schedule.as_ref() else {
            return Ok(resolved);
        };
        let window = self.capture_window_ms(schedule);

        let mut best: Option<(usize, f64)> = None;
        for (slot, event) in schedule.events.iter().enumerate().skip(self.next_slot) {
            if event.expected_time_ms - window > relative {
                break;
            }
            let distance = (relative - event.expected_time_ms).abs();
            if distance <= window && best.map_or(true, |(_, d)| distance < d) {
                best = Some((slot, distance));
            }
        }

        let Some((matched, _)) = best else {
            self.stray_onsets += 1;
            tracing::trace!(relative_ms = relative, "stray onset");
            return Ok(resolved);
        };

        let windows = schedule.windows();
        for event in &schedule.events[self.next_slot..matched] {
            let record = HitRecord::resolve(event.index, event.expected_time_ms, None, windows);
            self.hits.push(record.clone());
            resolved.push(record);
        }
        let event = schedule.events[matched];
        let record = HitRecord::resolve(event.index, event.expected_time_ms, Some(relative), windows);
        self.hits.push(record.clone());
        resolved.push(record);
        self.next_slot = matched + 1;

        Ok(resolved)
    }

    /// Resolve slots that timed out by `now_ms` (detector clock).
    pub fn advance(&mut self, now_ms: f64) -> Result<Vec<HitRecord>, SessionError> {
        self.require_active(SessionState::Active)?;
        let relative = now_ms - self.start_time_ms;
        Ok(self.expire_before(relative))
    }

    /// Resolve every open slot from client-reported hit times.
    ///
    /// The first submission for a slot wins; unknown indices are ignored;
    /// slots with no submission are misses.
    pub fn apply_submissions(
        &mut self,
        submissions: &[HitSubmission],
    ) -> Result<Vec<HitRecord>, SessionError> {
        self.require_active(SessionState::Active)?;
        let Some(schedule) = self.schedule.as_ref() else {
            return Ok(Vec::new());
        };

        let mut reported: Vec<Option<Option<f64>>> = vec![None; schedule.total_notes()];
        for submission in submissions {
            if let Some(slot) = reported.get_mut(submission.note_index) {
                if slot.is_none() {
                    *slot = Some(submission.hit_time_ms);
                }
            }
        }

        let windows = schedule.windows();
        let mut resolved = Vec::with_capacity(schedule.total_notes() - self.next_slot);
        for event in &schedule.events[self.next_slot..] {
            let actual = reported[event.index].flatten();
            let record = HitRecord::resolve(event.index, event.expected_time_ms, actual, windows);
            self.hits.push(record.clone());
            resolved.push(record);
        }
        self.next_slot = schedule.total_notes();
        Ok(resolved)
    }

    /// Close the session: open slots become misses and stats are frozen.
    /// `Active -> Completed`.
    pub fn complete(&mut self) -> Result<SessionStats, SessionError> {
        self.require_active(SessionState::Completed)?;
        self.expire_before(f64::INFINITY);
        self.state = SessionState::Completed;
        let stats = scorer::score_with(&self.hits, self.settings.streak_bonus);
        tracing::info!(
            notes = stats.total_notes,
            score = stats.total_score,
            accuracy = stats.accuracy_percentage,
            stray = self.stray_onsets,
            "session completed"
        );
        self.stats = Some(stats.clone());
        Ok(stats)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn schedule_ref(&self) -> Option<&Schedule> {
        self.schedule.as_ref()
    }

    pub fn start_time_ms(&self) -> f64 {
        self.start_time_ms
    }

    pub fn hits(&self) -> &[HitRecord] {
        &self.hits
    }

    pub fn stats(&self) -> Option<&SessionStats> {
        self.stats.as_ref()
    }

    pub fn stray_onsets(&self) -> u32 {
        self.stray_onsets
    }

    /// All slots resolved.
    pub fn is_exhausted(&self) -> bool {
        self.schedule
            .as_ref()
            .map_or(true, |s| self.next_slot >= s.total_notes())
    }

    /// Detector-clock time after which every slot has timed out.
    pub fn end_time_ms(&self) -> Option<f64> {
        let schedule = self.schedule.as_ref()?;
        let last = schedule.events.last()?;
        Some(self.start_time_ms + last.expected_time_ms + self.capture_window_ms(schedule))
    }
}

//! TimingEngine: wires capture, onset detection and the practice session.
//!
//! Onsets arrive on the capture dispatcher thread and are matched against the
//! active session there. Every resolved hit is published on a broadcast
//! channel. The owner drives `poll()` from its own loop to expire timed-out
//! slots and to notice device failures.

use std::sync::{Arc, Mutex, MutexGuard};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::analysis::onset::{CalibrationState, OnsetDetector, OnsetEvent};
use crate::audio::{CaptureEngine, InputBackend};
use crate::config::AppConfig;
use crate::error::{log_session_error, AudioError, ErrorCode, SessionError};
use crate::telemetry::{self, DiagnosticError};
use crate::timing::modes::{Difficulty, GameMode};
use crate::timing::schedule::{Schedule, ScheduleConfig};
use crate::timing::scorer::{practice_tips, SessionStats};
use crate::timing::session::{HitRecord, SessionSettings, SessionState, TimingSession};

mod subscriptions;

const CHANNEL_CAPACITY: usize = 256;

/// Returned by [`TimingEngine::start_session`].
#[derive(Debug, Clone)]
pub struct SessionStart {
    pub schedule: Schedule,
    /// Capture-clock time of the first scheduled slot
    pub start_time_ms: f64,
}

/// Result of one [`TimingEngine::poll`] call.
#[derive(Debug, Clone, Default)]
pub struct PollStatus {
    /// Slots resolved as timeouts by this call
    pub resolved: Vec<HitRecord>,
    /// Every slot has been resolved
    pub exhausted: bool,
    /// Device failure surfaced by this call; capture is stopped
    pub device_error: Option<AudioError>,
}

/// Device failure as carried in a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFault {
    pub code: i32,
    pub message: String,
}

impl From<&AudioError> for DeviceFault {
    fn from(err: &AudioError) -> Self {
        Self {
            code: err.code(),
            message: err.message(),
        }
    }
}

/// Final report of a finished session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub game_mode: GameMode,
    pub difficulty: Difficulty,
    pub tempo_bpm: u32,
    pub total_notes: usize,
    pub hits: Vec<HitRecord>,
    pub stats: SessionStats,
    pub tips: Vec<String>,
    pub stray_onsets: u32,
    pub dropped_frames: u64,
    pub device_error: Option<DeviceFault>,
}

type SharedSession = Arc<Mutex<Option<TimingSession>>>;

pub struct TimingEngine {
    config: AppConfig,
    capture: Arc<CaptureEngine>,
    detector: OnsetDetector,
    session: SharedSession,
    hits_tx: broadcast::Sender<HitRecord>,
    onsets_tx: broadcast::Sender<OnsetEvent>,
    device_error: Mutex<Option<AudioError>>,
    rng: Mutex<StdRng>,
}

impl TimingEngine {
    pub fn new(config: AppConfig, backend: Arc<dyn InputBackend>) -> Self {
        Self::with_rng(config, backend, StdRng::from_entropy())
    }

    /// Engine whose schedules are reproducible from `seed`.
    pub fn with_seed(config: AppConfig, backend: Arc<dyn InputBackend>, seed: u64) -> Self {
        Self::with_rng(config, backend, StdRng::seed_from_u64(seed))
    }

    /// Engine over the system audio hosts.
    pub fn with_cpal(config: AppConfig) -> Self {
        Self::new(config, Arc::new(crate::audio::CpalBackend::new()))
    }

    fn with_rng(config: AppConfig, backend: Arc<dyn InputBackend>, rng: StdRng) -> Self {
        let capture = Arc::new(CaptureEngine::new(backend, config.audio.clone()));
        let detector = OnsetDetector::new(
            Arc::clone(&capture),
            CalibrationState::from(&config.detection),
            config.calibration.clone(),
        );
        let (hits_tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (onsets_tx, _) = broadcast::channel(CHANNEL_CAPACITY);

        Self {
            config,
            capture,
            detector,
            session: Arc::new(Mutex::new(None)),
            hits_tx,
            onsets_tx,
            device_error: Mutex::new(None),
            rng: Mutex::new(rng),
        }
    }

    fn lock_session(&self) -> Result<MutexGuard<'_, Option<TimingSession>>, SessionError> {
        self.session.lock().map_err(|_| SessionError::StatePoisoned)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn capture(&self) -> &Arc<CaptureEngine> {
        &self.capture
    }

    pub fn detector(&self) -> &OnsetDetector {
        &self.detector
    }

    /// Generate a schedule and start a session on it.
    pub fn start_session(
        &self,
        config: &ScheduleConfig,
        count_in_ms: f64,
    ) -> Result<SessionStart, SessionError> {
        let mut session = TimingSession::new(SessionSettings::from(&self.config.session));
        {
            let mut rng = self.rng.lock().map_err(|_| SessionError::StatePoisoned)?;
            session.schedule(config, &mut *rng)?;
        }
        self.run_session(session, count_in_ms)
    }

    /// Start a session on a prepared schedule.
    pub fn start_schedule(&self, schedule: Schedule, count_in_ms: f64) -> Result<SessionStart, SessionError> {
        let session = TimingSession::from_schedule(schedule, SessionSettings::from(&self.config.session));
        self.run_session(session, count_in_ms)
    }

    fn run_session(&self, mut session: TimingSession, count_in_ms: f64) -> Result<SessionStart, SessionError> {
        {
            let current = self.lock_session()?;
            if let Some(active) = current.as_ref().filter(|s| s.state() == SessionState::Active) {
                return Err(SessionError::InvalidTransition {
                    from: active.state().name(),
                    to: "active",
                });
            }
        }

        // Anchor before capture starts so the first frames are already in range.
        let start_time_ms = self.capture.now_ms() + count_in_ms.max(0.0);
        session.begin(start_time_ms)?;
        let schedule = session
            .schedule_ref()
            .cloned()
            .ok_or(SessionError::InvalidTransition {
                from: "idle",
                to: "active",
            })?;
        *self.lock_session()? = Some(session);

        if let Ok(mut latched) = self.device_error.lock() {
            *latched = None;
        }
        self.install_note_callback()?;
        if !self.detector.is_detecting() {
            if let Err(err) = self.detector.start() {
                *self.lock_session()? = None;
                return Err(SessionError::Audio(err));
            }
        }

        tracing::info!(
            mode = %schedule.game_mode,
            tempo = schedule.tempo_bpm,
            notes = schedule.total_notes(),
            start_time_ms,
            "session started"
        );
        Ok(SessionStart {
            schedule,
            start_time_ms,
        })
    }

    fn install_note_callback(&self) -> Result<(), SessionError> {
        let session = Arc::clone(&self.session);
        let hits_tx = self.hits_tx.clone();
        let onsets_tx = self.onsets_tx.clone();
        self.detector
            .set_note_callback(Some(Arc::new(move |onset: &OnsetEvent| {
                let _ = onsets_tx.send(*onset);
                let Ok(mut slot) = session.lock() else {
                    return;
                };
                if let Some(active) = slot.as_mut().filter(|s| s.state() == SessionState::Active) {
                    // Publish under the lock to keep note_index order across threads.
                    publish_hits(&hits_tx, active.register_onset(onset).unwrap_or_default());
                }
            })))
            .map_err(|_| SessionError::StatePoisoned)
    }

    /// Expire timed-out slots and surface device failures.
    ///
    /// A device failure stops capture; hits recorded so far are kept and the
    /// session can still be finished.
    pub fn poll(&self) -> Result<PollStatus, SessionError> {
        let mut status = PollStatus::default();

        if let Some(err) = self.capture.take_stream_error() {
            if let Err(stop_err) = self.detector.stop() {
                tracing::warn!("failed to stop detection after device error: {stop_err}");
            }
            telemetry::hub().record_error(DiagnosticError::StreamFailure, err.to_string());
            if let Ok(mut latched) = self.device_error.lock() {
                *latched = Some(err.clone());
            }
            status.device_error = Some(err);
        }

        let latency_ms = self.latency_offset_ms()?;
        let now_ms = self.capture.now_ms() - latency_ms;
        let mut slot = self.lock_session()?;
        if let Some(session) = slot.as_mut().filter(|s| s.state() == SessionState::Active) {
            status.resolved = session.advance(now_ms)?;
            status.exhausted = session.is_exhausted();
            publish_hits(&self.hits_tx, status.resolved.clone());
        } else {
            status.exhausted = true;
        }
        Ok(status)
    }

    pub fn has_active_session(&self) -> bool {
        self.session
            .lock()
            .map(|slot| slot.as_ref().is_some_and(|s| s.state() == SessionState::Active))
            .unwrap_or(false)
    }

    /// Capture-clock time after which every slot of the active session has
    /// timed out.
    pub fn session_end_time_ms(&self) -> Option<f64> {
        let latency_ms = self.latency_offset_ms().ok()?;
        let end_ms = self.session.lock().ok()?.as_ref()?.end_time_ms()?;
        Some(end_ms + latency_ms)
    }

    /// Onset timestamps lag the capture clock by this much; timeouts use the
    /// onset clock.
    fn latency_offset_ms(&self) -> Result<f64, SessionError> {
        self.detector
            .calibration_state()
            .map(|state| state.latency_offset_ms)
            .map_err(|_| SessionError::StatePoisoned)
    }

    /// Stop detection, close the session and report.
    ///
    /// Frames still queued when this is called are detected first.
    pub fn finish(&self) -> Result<SessionReport, SessionError> {
        if let Err(err) = self.detector.stop() {
            tracing::warn!("failed to stop detection cleanly: {err}");
        }

        let mut session = self.lock_session()?.take().ok_or(SessionError::InvalidTransition {
            from: "idle",
            to: "completed",
        })?;
        if let Err(err) = self.detector.set_note_callback(None) {
            tracing::warn!("failed to clear note callback: {err}");
        }

        let resolved_before = session.hits().len();
        let stats = session.complete().inspect_err(|err| log_session_error(err, "finish"))?;
        publish_hits(&self.hits_tx, session.hits()[resolved_before..].to_vec());
        telemetry::hub().record_session(&stats);

        let schedule = session
            .schedule_ref()
            .ok_or(SessionError::InvalidTransition {
                from: "idle",
                to: "completed",
            })?;
        let device_error = self
            .device_error
            .lock()
            .ok()
            .and_then(|latched| latched.as_ref().map(DeviceFault::from));

        Ok(SessionReport {
            game_mode: schedule.game_mode,
            difficulty: schedule.difficulty,
            tempo_bpm: schedule.tempo_bpm,
            total_notes: schedule.total_notes(),
            hits: session.hits().to_vec(),
            tips: practice_tips(&stats),
            stats,
            stray_onsets: session.stray_onsets(),
            dropped_frames: self.capture.dropped_frames(),
            device_error,
        })
    }
}

fn publish_hits(tx: &broadcast::Sender<HitRecord>, hits: Vec<HitRecord>) {
    for hit in hits {
        telemetry::hub().record_hit(&hit);
        // No subscribers is fine.
        let _ = tx.send(hit);
    }
}

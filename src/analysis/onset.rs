// OnsetDetector - turns captured frames into discrete note onsets
//
// A frame triggers when its RMS is above the noise threshold and at least
// `min_retrigger_interval_ms` has passed since the last trigger. The interval
// collapses one ringing note, which stays above threshold for many buffers,
// into a single onset. Trigger times are shifted back by the calibrated input
// latency.
//
// Detection runs on the capture dispatcher thread. Threshold, latency offset,
// running and paused flags are the only state shared with the control thread.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::{Deserialize, Serialize};

use super::calibration::{
    estimate_latency, suggest_threshold, LatencyCalibration, ThresholdCalibration, MAX_THRESHOLD,
    MIN_THRESHOLD,
};
use crate::audio::{AudioFrame, CaptureEngine};
use crate::config::{CalibrationConfig, DetectionConfig};
use crate::error::{log_calibration_error, AudioError, CalibrationError};
use crate::telemetry;

/// Bound applied when the latency offset is set by hand.
pub const MAX_MANUAL_LATENCY_OFFSET_MS: f64 = 100.0;

/// Device/environment profile used by the detector.
///
/// Persisted as a user setting; fields missing from stored JSON take defaults.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationState {
    #[serde(default = "default_threshold")]
    pub noise_threshold: f32,
    #[serde(default)]
    pub latency_offset_ms: f64,
    #[serde(default = "default_retrigger")]
    pub min_retrigger_interval_ms: f64,
}

fn default_threshold() -> f32 {
    DetectionConfig::default().threshold
}

fn default_retrigger() -> f64 {
    DetectionConfig::default().min_retrigger_interval_ms
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self::from(&DetectionConfig::default())
    }
}

impl From<&DetectionConfig> for CalibrationState {
    fn from(config: &DetectionConfig) -> Self {
        Self {
            noise_threshold: config.threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD),
            latency_offset_ms: config.latency_offset_ms,
            min_retrigger_interval_ms: config.min_retrigger_interval_ms.max(0.0),
        }
    }
}

/// A detected onset on the capture clock, latency compensated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnsetEvent {
    pub trigger_time_ms: f64,
    /// RMS of the triggering buffer
    pub level: f32,
}

/// Minimum-interval gate between triggers.
#[derive(Debug, Default)]
pub struct RetriggerGate {
    last_trigger_ms: Option<f64>,
}

impl RetriggerGate {
    pub fn reset(&mut self) {
        self.last_trigger_ms = None;
    }

    pub fn last_trigger_ms(&self) -> Option<f64> {
        self.last_trigger_ms
    }

    /// Accept a trigger at `now_ms` if the interval has elapsed.
    /// The first trigger is always accepted.
    pub fn try_trigger(&mut self, now_ms: f64, min_interval_ms: f64) -> bool {
        let open = self
            .last_trigger_ms
            .map_or(true, |last| now_ms - last >= min_interval_ms);
        if open {
            self.last_trigger_ms = Some(now_ms);
        }
        open
    }
}

/// Counters reported by [`OnsetDetector::statistics`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectorStatistics {
    pub trigger_count: u64,
    pub peak_level: f32,
    pub threshold: f32,
    pub latency_offset_ms: f64,
    pub is_detecting: bool,
}

pub type NoteCallback = Arc<dyn Fn(&OnsetEvent) + Send + Sync>;
pub type LevelCallback = Arc<dyn Fn(f32, f32) + Send + Sync>;

#[derive(Default)]
struct DetectorShared {
    calibration: RwLock<CalibrationState>,
    detecting: AtomicBool,
    paused: AtomicBool,
    gate: Mutex<RetriggerGate>,
    note_callback: RwLock<Option<NoteCallback>>,
    level_callback: RwLock<Option<LevelCallback>>,
    trigger_count: AtomicU64,
    peak_level_bits: AtomicU32,
}

impl DetectorShared {
    fn observe_peak(&self, peak: f32) {
        let mut current = self.peak_level_bits.load(Ordering::Relaxed);
        while peak > f32::from_bits(current) {
            match self.peak_level_bits.compare_exchange_weak(
                current,
                peak.to_bits(),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
    }

    fn process(&self, rms: f32, peak: f32, now_ms: f64) -> Option<OnsetEvent> {
        if let Ok(slot) = self.level_callback.read() {
            if let Some(callback) = slot.as_ref() {
                callback(rms, peak);
            }
        }
        self.observe_peak(peak);

        if !self.detecting.load(Ordering::Acquire) || self.paused.load(Ordering::Acquire) {
            return None;
        }

        let state = *self.calibration.read().ok()?;
        if rms <= state.noise_threshold {
            return None;
        }
        if !self
            .gate
            .lock()
            .ok()?
            .try_trigger(now_ms, state.min_retrigger_interval_ms)
        {
            return None;
        }

        let event = OnsetEvent {
            trigger_time_ms: now_ms - state.latency_offset_ms,
            level: rms,
        };
        self.trigger_count.fetch_add(1, Ordering::Relaxed);
        telemetry::hub().record_onset(&event);

        if let Ok(slot) = self.note_callback.read() {
            if let Some(callback) = slot.as_ref() {
                callback(&event);
            }
        }
        Some(event)
    }
}

/// Threshold-and-interval onset detector on top of a [`CaptureEngine`].
pub struct OnsetDetector {
    capture: Arc<CaptureEngine>,
    shared: Arc<DetectorShared>,
    calibration_config: CalibrationConfig,
}

impl OnsetDetector {
    pub fn new(
        capture: Arc<CaptureEngine>,
        state: CalibrationState,
        calibration_config: CalibrationConfig,
    ) -> Self {
        let shared = DetectorShared {
            calibration: RwLock::new(state),
            ..DetectorShared::default()
        };
        Self {
            capture,
            shared: Arc::new(shared),
            calibration_config,
        }
    }

    pub fn capture(&self) -> &Arc<CaptureEngine> {
        &self.capture
    }

    /// Install the frame callback and start capture. Statistics restart.
    pub fn start(&self) -> Result<(), AudioError> {
        if let Ok(mut gate) = self.shared.gate.lock() {
            gate.reset();
        }
        self.reset_statistics();
        self.shared.paused.store(false, Ordering::Release);

        let shared = Arc::clone(&self.shared);
        self.capture
            .set_input_callback(Some(Arc::new(move |frame: &AudioFrame| {
                shared.process(frame.rms, frame.peak, frame.capture_time_ms);
            })))?;
        self.shared.detecting.store(true, Ordering::Release);

        if let Err(err) = self.capture.start() {
            self.shared.detecting.store(false, Ordering::Release);
            let _ = self.capture.set_input_callback(None);
            return Err(err);
        }
        tracing::info!("onset detection started");
        Ok(())
    }

    /// Stop detection and capture.
    pub fn stop(&self) -> Result<(), AudioError> {
        self.shared.detecting.store(false, Ordering::Release);
        self.capture.set_input_callback(None)?;
        self.capture.stop()
    }

    pub fn pause(&self) {
        self.shared.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.shared.paused.store(false, Ordering::Release);
    }

    pub fn is_detecting(&self) -> bool {
        self.shared.detecting.load(Ordering::Acquire) && !self.shared.paused.load(Ordering::Acquire)
    }

    pub fn is_paused(&self) -> bool {
        self.shared.paused.load(Ordering::Acquire)
    }

    /// Feed one frame directly, bypassing capture. Used for offline replay.
    pub fn process_frame(&self, frame: &AudioFrame) -> Option<OnsetEvent> {
        self.shared.process(frame.rms, frame.peak, frame.capture_time_ms)
    }

    /// Enable detection without starting capture, for frames fed by hand.
    pub fn arm(&self) {
        if let Ok(mut gate) = self.shared.gate.lock() {
            gate.reset();
        }
        self.shared.paused.store(false, Ordering::Release);
        self.shared.detecting.store(true, Ordering::Release);
    }

    pub fn set_note_callback(&self, callback: Option<NoteCallback>) -> Result<(), CalibrationError> {
        let mut slot = self
            .shared
            .note_callback
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)?;
        *slot = callback;
        Ok(())
    }

    pub fn set_level_callback(&self, callback: Option<LevelCallback>) -> Result<(), CalibrationError> {
        let mut slot = self
            .shared
            .level_callback
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)?;
        *slot = callback;
        Ok(())
    }

    pub fn calibration_state(&self) -> Result<CalibrationState, CalibrationError> {
        self.shared
            .calibration
            .read()
            .map(|state| *state)
            .map_err(|_| CalibrationError::StatePoisoned)
    }

    fn update_state(&self, update: impl FnOnce(&mut CalibrationState)) -> Result<CalibrationState, CalibrationError> {
        let mut state = self
            .shared
            .calibration
            .write()
            .map_err(|_| CalibrationError::StatePoisoned)?;
        update(&mut state);
        Ok(*state)
    }

    pub fn set_calibration_state(&self, state: CalibrationState) -> Result<(), CalibrationError> {
        self.update_state(|current| *current = state).map(|_| ())
    }

    /// Set the threshold, clamped to `[0.001, 1.0]`.
    pub fn set_threshold(&self, threshold: f32) -> Result<f32, CalibrationError> {
        self.update_state(|state| state.noise_threshold = threshold.clamp(MIN_THRESHOLD, MAX_THRESHOLD))
            .map(|state| state.noise_threshold)
    }

    /// Set the latency offset by hand, clamped to ±100 ms.
    pub fn set_latency_offset(&self, offset_ms: f64) -> Result<f64, CalibrationError> {
        let clamped = offset_ms.clamp(-MAX_MANUAL_LATENCY_OFFSET_MS, MAX_MANUAL_LATENCY_OFFSET_MS);
        self.update_state(|state| state.latency_offset_ms = clamped)
            .map(|state| state.latency_offset_ms)
    }

    pub fn set_min_retrigger_interval(&self, interval_ms: f64) -> Result<f64, CalibrationError> {
        self.update_state(|state| state.min_retrigger_interval_ms = interval_ms.max(0.0))
            .map(|state| state.min_retrigger_interval_ms)
    }

    /// Measure the noise floor and adopt `floor * K + margin` as threshold.
    ///
    /// Detection is paused for the measurement.
    pub fn calibrate_threshold(&self, duration_ms: u64) -> Result<ThresholdCalibration, CalibrationError> {
        let was_paused = self.shared.paused.swap(true, Ordering::AcqRel);
        let measured = self.capture.calibrate_noise_floor(duration_ms);
        if !was_paused {
            self.resume();
        }

        let noise_floor = measured.map_err(|err| {
            let err = CalibrationError::from(err);
            log_calibration_error(&err, "calibrate_threshold");
            err
        })?;
        let result = suggest_threshold(noise_floor, &self.calibration_config);
        self.update_state(|state| state.noise_threshold = result.suggested_threshold)?;
        tracing::info!(
            noise_floor = result.noise_floor,
            threshold = result.suggested_threshold,
            "threshold calibrated"
        );
        Ok(result)
    }

    /// Estimate and adopt the input latency from a play-along run.
    ///
    /// With too few usable pairs the state is left unchanged and a zero
    /// result is returned.
    pub fn calibrate_latency(&self, reference_times: &[f64], trigger_times: &[f64]) -> LatencyCalibration {
        match estimate_latency(reference_times, trigger_times, &self.calibration_config) {
            Ok(result) => {
                match self.update_state(|state| state.latency_offset_ms = result.suggested_latency_offset_ms) {
                    Ok(_) => {
                        tracing::info!(
                            average_offset_ms = result.average_offset_ms,
                            latency_offset_ms = result.suggested_latency_offset_ms,
                            samples = result.sample_count,
                            "latency calibrated"
                        );
                        result
                    }
                    Err(err) => {
                        log_calibration_error(&err, "calibrate_latency");
                        LatencyCalibration::zero()
                    }
                }
            }
            Err(err) => {
                tracing::warn!("latency calibration skipped: {err}");
                telemetry::hub().record_error(
                    telemetry::DiagnosticError::CalibrationSkipped,
                    err.to_string(),
                );
                LatencyCalibration::zero()
            }
        }
    }

    pub fn statistics(&self) -> DetectorStatistics {
        let state = self.calibration_state().unwrap_or_default();
        DetectorStatistics {
            trigger_count: self.shared.trigger_count.load(Ordering::Relaxed),
            peak_level: f32::from_bits(self.shared.peak_level_bits.load(Ordering::Relaxed)),
            threshold: state.noise_threshold,
            latency_offset_ms: state.latency_offset_ms,
            is_detecting: self.is_detecting(),
        }
    }

    pub fn reset_statistics(&self) {
        self.shared.trigger_count.store(0, Ordering::Relaxed);
        self.shared.peak_level_bits.store(0, Ordering::Relaxed);
    }
}

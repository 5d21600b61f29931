//! Capture engine: owns the input stream and the dispatcher thread.
//!
//! The backend's real-time callback only fills pooled frames (see
//! [`FrameSink`]). A dispatcher thread drains the frame queue and invokes the
//! registered callbacks, so callback code never runs on the audio thread.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use rtrb::PopError;

use super::backend::{
    ActiveStream, CpalBackend, FrameSink, InputBackend, LatencyProbe, StreamErrorSlot, StreamInfo,
    StreamRequest,
};
use super::buffer_pool::{DispatchChannels, DropCounter, FramePool};
use super::clock::AudioClock;
use super::device::{InputDevice, LatencyInfo};
use super::frame::{AudioFrame, FRAME_CAPACITY};
use crate::config::AudioConfig;
use crate::error::{log_audio_error, AudioError};
use crate::telemetry;

/// Floor reported when no buffer arrived during a noise measurement.
pub const DEFAULT_NOISE_FLOOR: f32 = 0.01;

/// Callback invoked on the dispatcher thread for every captured frame.
pub type InputCallback = Arc<dyn Fn(&AudioFrame) + Send + Sync>;

#[derive(Default)]
struct CallbackSlots {
    input: RwLock<Option<InputCallback>>,
    tap: RwLock<Option<InputCallback>>,
}

impl CallbackSlots {
    fn dispatch(&self, frame: &AudioFrame) {
        if let Ok(slot) = self.input.read() {
            if let Some(callback) = slot.as_ref() {
                callback(frame);
            }
        }
        if let Ok(slot) = self.tap.read() {
            if let Some(callback) = slot.as_ref() {
                callback(frame);
            }
        }
    }
}

/// Running average of buffer RMS values.
#[derive(Debug, Default)]
pub struct NoiseFloorMeter {
    totals: Mutex<(f64, u64)>,
}

impl NoiseFloorMeter {
    pub fn observe(&self, rms: f32) {
        if let Ok(mut totals) = self.totals.lock() {
            totals.0 += rms as f64;
            totals.1 += 1;
        }
    }

    /// Mean RMS, `None` before the first buffer.
    pub fn average(&self) -> Option<f32> {
        let totals = self.totals.lock().ok()?;
        (totals.1 > 0).then(|| (totals.0 / totals.1 as f64) as f32)
    }
}

struct RunningCapture {
    stream: ActiveStream,
    dispatcher: JoinHandle<()>,
    keep_running: Arc<AtomicBool>,
}

pub struct CaptureEngine {
    backend: Arc<dyn InputBackend>,
    config: AudioConfig,
    device: Mutex<Option<usize>>,
    running: Mutex<Option<RunningCapture>>,
    callbacks: Arc<CallbackSlots>,
    clock: AudioClock,
    drops: DropCounter,
    dispatched: Arc<AtomicU64>,
    errors: StreamErrorSlot,
    latency: LatencyProbe,
    stream_info: Mutex<Option<StreamInfo>>,
}

impl CaptureEngine {
    pub fn new(backend: Arc<dyn InputBackend>, config: AudioConfig) -> Self {
        let device = config.input_device;
        Self {
            backend,
            config,
            device: Mutex::new(device),
            running: Mutex::new(None),
            callbacks: Arc::new(CallbackSlots::default()),
            clock: AudioClock::new(),
            drops: DropCounter::default(),
            dispatched: Arc::new(AtomicU64::new(0)),
            errors: StreamErrorSlot::default(),
            latency: LatencyProbe::default(),
            stream_info: Mutex::new(None),
        }
    }

    /// Engine over the system audio hosts.
    pub fn with_cpal(config: AudioConfig) -> Self {
        Self::new(Arc::new(CpalBackend::new()), config)
    }

    fn lock_running(&self) -> Result<MutexGuard<'_, Option<RunningCapture>>, AudioError> {
        self.running.lock().map_err(|_| AudioError::LockPoisoned {
            component: "capture_running".to_string(),
        })
    }

    fn lock_device(&self) -> Result<MutexGuard<'_, Option<usize>>, AudioError> {
        self.device.lock().map_err(|_| AudioError::LockPoisoned {
            component: "capture_device".to_string(),
        })
    }

    /// Open the input stream and start dispatching. No-op when running.
    pub fn start(&self) -> Result<(), AudioError> {
        let mut running = self.lock_running()?;
        if running.is_some() {
            return Ok(());
        }

        // A fresh stream starts without the previous stream's failure.
        let _ = self.errors.take();
        self.latency.reset();

        let (capture_channels, dispatch_channels) =
            FramePool::new(self.config.queue_capacity, FRAME_CAPACITY).split();
        let sink = FrameSink::new(
            capture_channels,
            self.clock.clone(),
            self.config.sample_rate,
            self.drops.clone(),
            self.errors.clone(),
            self.latency.clone(),
        );
        let request = StreamRequest {
            device: *self.lock_device()?,
            sample_rate: self.config.sample_rate,
            buffer_size: self.config.buffer_size,
        };

        let stream = match self.backend.open_input(&request, sink) {
            Ok(stream) => stream,
            Err(err) => {
                log_audio_error(&err, "start");
                return Err(err);
            }
        };

        let keep_running = Arc::new(AtomicBool::new(true));
        let dispatcher = spawn_dispatcher(
            dispatch_channels,
            Arc::clone(&self.callbacks),
            Arc::clone(&keep_running),
            self.drops.clone(),
            Arc::clone(&self.dispatched),
        )?;

        if let Ok(mut info) = self.stream_info.lock() {
            *info = Some(stream.info().clone());
        }
        tracing::info!(backend = self.backend.name(), "capture started");
        *running = Some(RunningCapture {
            stream,
            dispatcher,
            keep_running,
        });
        Ok(())
    }

    /// Stop the stream and the dispatcher. No-op when stopped.
    ///
    /// Frames already queued are still dispatched before this returns.
    pub fn stop(&self) -> Result<(), AudioError> {
        let Some(capture) = self.lock_running()?.take() else {
            return Ok(());
        };
        capture.stream.stop();
        capture.keep_running.store(false, Ordering::Release);
        if capture.dispatcher.join().is_err() {
            tracing::error!("capture dispatcher panicked");
        }
        tracing::info!(
            dispatched = self.frames_dispatched(),
            dropped = self.dropped_frames(),
            "capture stopped"
        );
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().map(|r| r.is_some()).unwrap_or(false)
    }

    /// Register the per-frame callback, replacing any previous one.
    pub fn set_input_callback(&self, callback: Option<InputCallback>) -> Result<(), AudioError> {
        let mut slot = self.callbacks.input.write().map_err(|_| AudioError::LockPoisoned {
            component: "input_callback".to_string(),
        })?;
        *slot = callback;
        Ok(())
    }

    fn set_tap(&self, callback: Option<InputCallback>) -> Result<(), AudioError> {
        let mut slot = self.callbacks.tap.write().map_err(|_| AudioError::LockPoisoned {
            component: "capture_tap".to_string(),
        })?;
        *slot = callback;
        Ok(())
    }

    pub fn input_devices(&self) -> Result<Vec<InputDevice>, AudioError> {
        self.backend.input_devices()
    }

    pub fn input_device(&self) -> Option<usize> {
        self.device.lock().ok().and_then(|d| *d)
    }

    /// Select the input device, restarting the stream when running.
    pub fn set_input_device(&self, device: Option<usize>) -> Result<(), AudioError> {
        *self.lock_device()? = device;
        if self.is_running() {
            tracing::info!(?device, "restarting capture on new device");
            self.stop()?;
            self.start()?;
        }
        Ok(())
    }

    /// Measure ambient RMS for `duration_ms`, blocking the caller.
    ///
    /// Starts and stops the stream itself when it was not running. Returns
    /// [`DEFAULT_NOISE_FLOOR`] when no buffer arrived.
    pub fn calibrate_noise_floor(&self, duration_ms: u64) -> Result<f32, AudioError> {
        let meter = Arc::new(NoiseFloorMeter::default());
        let tap_meter = Arc::clone(&meter);
        self.set_tap(Some(Arc::new(move |frame: &AudioFrame| {
            tap_meter.observe(frame.rms)
        })))?;

        let was_running = self.is_running();
        if !was_running {
            if let Err(err) = self.start() {
                self.set_tap(None)?;
                return Err(err);
            }
        }
        thread::sleep(Duration::from_millis(duration_ms));
        self.set_tap(None)?;

        if !was_running {
            self.stop()?;
        }

        let floor = meter.average().unwrap_or_else(|| {
            tracing::warn!(duration_ms, "no audio during noise measurement, using default floor");
            DEFAULT_NOISE_FLOOR
        });
        tracing::info!(noise_floor = floor, duration_ms, "noise floor measured");
        Ok(floor)
    }

    pub fn latency_info(&self) -> LatencyInfo {
        let (sample_rate, buffer_size) = self
            .stream_info
            .lock()
            .ok()
            .and_then(|info| info.as_ref().map(|i| (i.sample_rate, i.buffer_size)))
            .unwrap_or((self.config.sample_rate, self.config.buffer_size));
        LatencyInfo::new(self.latency.get_ms(), sample_rate, buffer_size)
    }

    pub fn stream_info(&self) -> Option<StreamInfo> {
        self.stream_info.lock().ok().and_then(|info| info.clone())
    }

    /// Surface a failure reported by the running stream.
    ///
    /// On failure the engine is stopped and the error returned once.
    pub fn take_stream_error(&self) -> Option<AudioError> {
        let err = self.errors.take()?;
        log_audio_error(&err, "stream");
        if let Err(stop_err) = self.stop() {
            log_audio_error(&stop_err, "stop after stream failure");
        }
        Some(err)
    }

    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    pub fn now_ms(&self) -> f64 {
        self.clock.now_ms()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.drops.get()
    }

    pub fn frames_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Acquire)
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn spawn_dispatcher(
    mut channels: DispatchChannels,
    callbacks: Arc<CallbackSlots>,
    keep_running: Arc<AtomicBool>,
    drops: DropCounter,
    dispatched: Arc<AtomicU64>,
) -> Result<JoinHandle<()>, AudioError> {
    thread::Builder::new()
        .name("capture-dispatch".to_string())
        .spawn(move || {
            let mut reported_drops = drops.get();
            loop {
                match channels.data_consumer.pop() {
                    Ok(frame) => {
                        callbacks.dispatch(&frame);
                        dispatched.fetch_add(1, Ordering::AcqRel);
                        if channels.pool_producer.push(frame).is_err() {
                            tracing::warn!("frame pool full, discarding frame");
                        }
                    }
                    Err(PopError::Empty) => {
                        let total = drops.get();
                        if total > reported_drops {
                            tracing::warn!(
                                dropped = total - reported_drops,
                                total,
                                "capture frames dropped"
                            );
                            telemetry::hub().record_dropped_frames(total - reported_drops, total);
                            reported_drops = total;
                        }
                        if !keep_running.load(Ordering::Acquire) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(1));
                    }
                }
            }
        })
        .map_err(|err| AudioError::HardwareError {
            details: format!("Failed to spawn dispatcher thread: {err}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::{SyntheticBackend, SyntheticSignal};
    use std::time::Instant;

    fn engine_with(backend: Arc<SyntheticBackend>) -> CaptureEngine {
        CaptureEngine::new(backend, AudioConfig::default())
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn start_and_stop_are_idempotent() {
        let backend = Arc::new(SyntheticBackend::silent(48_000, 256));
        let engine = engine_with(Arc::clone(&backend));

        engine.stop().unwrap();
        engine.start().unwrap();
        engine.start().unwrap();
        assert!(engine.is_running());
        assert_eq!(backend.open_count(), 1);

        engine.stop().unwrap();
        engine.stop().unwrap();
        assert!(!engine.is_running());
    }

    #[test]
    fn failed_open_leaves_engine_stopped() {
        let backend = Arc::new(SyntheticBackend::silent(48_000, 256));
        backend.set_fail_open(true);
        let engine = engine_with(Arc::clone(&backend));

        let err = engine.start().unwrap_err();
        assert!(matches!(err, AudioError::StreamOpenFailed { .. }));
        assert!(!engine.is_running());

        backend.set_fail_open(false);
        engine.start().unwrap();
        assert!(engine.is_running());
    }

    #[test]
    fn frames_reach_callback_with_levels_and_times() {
        let feed = SyntheticSignal::silence(100.0, 48_000)
            .with_noise(0.01, 5)
            .into_feed(480);
        let blocks = feed.block_count() as u64;
        let backend = Arc::new(SyntheticBackend::new(feed));
        let engine = engine_with(backend);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine
            .set_input_callback(Some(Arc::new(move |frame: &AudioFrame| {
                sink.lock().unwrap().push((frame.capture_time_ms, frame.rms, frame.peak));
            })))
            .unwrap();

        engine.start().unwrap();
        assert!(wait_for(|| engine.frames_dispatched() == blocks));
        engine.stop().unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), blocks as usize);
        assert_eq!(seen[0].0, 0.0);
        assert_eq!(seen[1].0, 10.0);
        assert!(seen.iter().all(|(_, rms, peak)| *rms > 0.0 && peak >= rms));
        assert_eq!(engine.dropped_frames(), 0);
    }

    #[test]
    fn noise_floor_averages_rms() {
        let feed = SyntheticSignal::silence(200.0, 48_000)
            .with_noise(0.02, 9)
            .into_feed(256);
        let engine = engine_with(Arc::new(SyntheticBackend::new(feed)));

        let floor = engine.calibrate_noise_floor(150).unwrap();
        assert!(floor > 0.005 && floor < 0.02, "floor {floor}");
        assert!(!engine.is_running());
    }

    #[test]
    fn noise_floor_defaults_without_audio() {
        let engine = engine_with(Arc::new(SyntheticBackend::silent(48_000, 256)));
        assert_eq!(engine.calibrate_noise_floor(20).unwrap(), DEFAULT_NOISE_FLOOR);
    }

    #[test]
    fn stream_failure_stops_engine() {
        let feed = SyntheticSignal::silence(500.0, 48_000).into_feed(256);
        let backend = Arc::new(SyntheticBackend::new(feed));
        backend.set_fail_after_blocks(Some(3));
        let engine = engine_with(Arc::clone(&backend));

        engine.start().unwrap();
        assert!(wait_for(|| backend.is_finished()));
        let err = engine.take_stream_error().expect("stream error");
        assert!(matches!(err, AudioError::StreamFailure { .. }));
        assert!(!engine.is_running());
        assert!(engine.take_stream_error().is_none());
    }

    #[test]
    fn switching_device_restarts_running_stream() {
        let backend = Arc::new(SyntheticBackend::silent(48_000, 256));
        let engine = engine_with(Arc::clone(&backend));
        engine.start().unwrap();
        engine.set_input_device(Some(0)).unwrap();
        assert_eq!(backend.open_count(), 2);
        assert!(engine.is_running());

        let err = engine.set_input_device(Some(7)).unwrap_err();
        assert_eq!(err, AudioError::DeviceNotFound { index: 7 });
        assert!(!engine.is_running());
    }

    #[test]
    fn latency_info_uses_stream_buffer() {
        let engine = engine_with(Arc::new(SyntheticBackend::silent(48_000, 480)));
        engine.start().unwrap();
        let info = engine.latency_info();
        assert_eq!(info.buffer_latency_ms, 10.0);
        assert_eq!(info.estimated_round_trip_ms, 20.0);
        engine.stop().unwrap();
    }
}

//! Synthetic input backend.
//!
//! Plays a prepared mono signal through the same [`FrameSink`] path a device
//! stream uses. Drives the pipeline in tests and replays WAV recordings from
//! the CLI.

use std::f32::consts::TAU;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{ActiveStream, FrameSink, InputBackend, StreamInfo, StreamRequest};
use crate::audio::device::InputDevice;
use crate::error::AudioError;

/// A mono signal cut into fixed-size blocks.
#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    pub sample_rate: u32,
    pub block_size: usize,
    pub samples: Arc<Vec<f32>>,
    /// Sleep one block period between blocks instead of running flat out
    pub realtime: bool,
}

impl SyntheticFeed {
    pub fn new(samples: Vec<f32>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            sample_rate,
            block_size: block_size.max(1),
            samples: Arc::new(samples),
            realtime: false,
        }
    }

    pub fn realtime(mut self, realtime: bool) -> Self {
        self.realtime = realtime;
        self
    }

    pub fn block_count(&self) -> usize {
        self.samples.len().div_ceil(self.block_size)
    }

    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64 * 1000.0
    }

    /// Load a WAV file, keeping the first channel.
    pub fn from_wav<P: AsRef<Path>>(path: P, block_size: usize) -> Result<Self, AudioError> {
        let path = path.as_ref();
        let open_failed = |err: hound::Error| AudioError::StreamOpenFailed {
            reason: format!("Failed to read {}: {err}", path.display()),
        };
        let mut reader = hound::WavReader::open(path).map_err(open_failed)?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<Result<_, _>>()
                .map_err(open_failed)?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1) as u32)) as f32;
                reader
                    .samples::<i32>()
                    .map(|sample| sample.map(|value| value as f32 / scale))
                    .collect::<Result<_, _>>()
                    .map_err(open_failed)?
            }
        };

        let mono = interleaved.chunks(channels).map(|frame| frame[0]).collect();
        Ok(Self::new(mono, spec.sample_rate, block_size))
    }
}

/// Builder for test signals: silence, low noise and plucked notes.
#[derive(Debug, Clone)]
pub struct SyntheticSignal {
    sample_rate: u32,
    samples: Vec<f32>,
}

impl SyntheticSignal {
    pub fn silence(duration_ms: f64, sample_rate: u32) -> Self {
        let len = (duration_ms / 1000.0 * sample_rate as f64).round() as usize;
        Self {
            sample_rate,
            samples: vec![0.0; len],
        }
    }

    /// Add uniform noise of the given amplitude from a seeded generator.
    pub fn with_noise(mut self, amplitude: f32, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        for sample in &mut self.samples {
            *sample += rng.gen_range(-amplitude..=amplitude);
        }
        self
    }

    /// Add an exponentially decaying 110 Hz note starting at `time_ms`.
    pub fn with_pluck(mut self, time_ms: f64, amplitude: f32, decay_ms: f32) -> Self {
        let start = (time_ms / 1000.0 * self.sample_rate as f64).round() as usize;
        let rate = self.sample_rate as f32;
        let ring = (decay_ms / 1000.0 * rate * 5.0) as usize;
        let end = (start + ring).min(self.samples.len());
        for (n, sample) in self.samples[start.min(end)..end].iter_mut().enumerate() {
            let t = n as f32 / rate;
            let envelope = (-t * 1000.0 / decay_ms).exp();
            *sample += amplitude * envelope * (TAU * 110.0 * t).sin();
        }
        self
    }

    pub fn with_plucks(self, times_ms: &[f64], amplitude: f32, decay_ms: f32) -> Self {
        times_ms
            .iter()
            .fold(self, |signal, &time| signal.with_pluck(time, amplitude, decay_ms))
    }

    pub fn into_feed(self, block_size: usize) -> SyntheticFeed {
        SyntheticFeed::new(self.samples, self.sample_rate, block_size)
    }
}

#[derive(Debug, Default)]
struct Progress {
    blocks_pushed: AtomicU64,
    finished: AtomicBool,
    opens: AtomicU64,
}

/// Backend that plays a [`SyntheticFeed`] every time a stream is opened.
pub struct SyntheticBackend {
    feed: Mutex<SyntheticFeed>,
    progress: Arc<Progress>,
    fail_open: AtomicBool,
    fail_after_blocks: Mutex<Option<u64>>,
}

impl SyntheticBackend {
    pub fn new(feed: SyntheticFeed) -> Self {
        Self {
            feed: Mutex::new(feed),
            progress: Arc::new(Progress::default()),
            fail_open: AtomicBool::new(false),
            fail_after_blocks: Mutex::new(None),
        }
    }

    /// Backend producing nothing but silence.
    pub fn silent(sample_rate: u32, block_size: usize) -> Self {
        Self::new(SyntheticFeed::new(Vec::new(), sample_rate, block_size))
    }

    pub fn set_feed(&self, feed: SyntheticFeed) {
        if let Ok(mut slot) = self.feed.lock() {
            *slot = feed;
        }
    }

    /// Make the next opens fail as a busy device would.
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Report a stream failure after `blocks` blocks, like an unplugged device.
    pub fn set_fail_after_blocks(&self, blocks: Option<u64>) {
        if let Ok(mut slot) = self.fail_after_blocks.lock() {
            *slot = blocks;
        }
    }

    pub fn blocks_pushed(&self) -> u64 {
        self.progress.blocks_pushed.load(Ordering::SeqCst)
    }

    /// Last opened stream played its whole feed (or stopped).
    pub fn is_finished(&self) -> bool {
        self.progress.finished.load(Ordering::SeqCst)
    }

    pub fn open_count(&self) -> u64 {
        self.progress.opens.load(Ordering::SeqCst)
    }
}

impl InputBackend for SyntheticBackend {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    fn input_devices(&self) -> Result<Vec<InputDevice>, AudioError> {
        let sample_rate = self
            .feed
            .lock()
            .map(|feed| feed.sample_rate)
            .map_err(|_| AudioError::LockPoisoned {
                component: "synthetic_feed".to_string(),
            })?;
        Ok(vec![InputDevice {
            index: 0,
            name: "Synthetic Input".to_string(),
            host: "synthetic".to_string(),
            channels: 1,
            default_sample_rate: sample_rate,
            low_latency: false,
            is_default: true,
        }])
    }

    fn open_input(&self, request: &StreamRequest, mut sink: FrameSink) -> Result<ActiveStream, AudioError> {
        if let Some(index) = request.device.filter(|&index| index != 0) {
            return Err(AudioError::DeviceNotFound { index });
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(AudioError::StreamOpenFailed {
                reason: "synthetic device busy".to_string(),
            });
        }

        let feed = self
            .feed
            .lock()
            .map_err(|_| AudioError::LockPoisoned {
                component: "synthetic_feed".to_string(),
            })?
            .clone();
        let fail_after = self.fail_after_blocks.lock().ok().and_then(|slot| *slot);

        let progress = Arc::clone(&self.progress);
        progress.opens.fetch_add(1, Ordering::SeqCst);
        progress.blocks_pushed.store(0, Ordering::SeqCst);
        progress.finished.store(false, Ordering::SeqCst);

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let info = StreamInfo {
            device_name: "Synthetic Input".to_string(),
            sample_rate: feed.sample_rate,
            buffer_size: feed.block_size as u32,
            channels: 1,
        };

        sink.bind_sample_rate(feed.sample_rate);
        let errors = sink.errors();
        let block_period = Duration::from_secs_f64(feed.block_size as f64 / feed.sample_rate.max(1) as f64);

        let handle = thread::Builder::new()
            .name("synthetic-input".to_string())
            .spawn(move || {
                for (index, block) in feed.samples.chunks(feed.block_size).enumerate() {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    if fail_after == Some(index as u64) {
                        errors.report(AudioError::StreamFailure {
                            reason: "synthetic device disconnected".to_string(),
                        });
                        break;
                    }
                    if !feed.realtime {
                        while !sink.has_room() && !stop_flag.load(Ordering::Acquire) {
                            thread::sleep(Duration::from_micros(200));
                        }
                    }
                    sink.push_interleaved(block, 1);
                    progress.blocks_pushed.fetch_add(1, Ordering::SeqCst);
                    if feed.realtime {
                        thread::sleep(block_period);
                    }
                }
                progress.finished.store(true, Ordering::SeqCst);
            })
            .map_err(|err| AudioError::HardwareError {
                details: format!("Failed to spawn synthetic input thread: {err}"),
            })?;

        Ok(ActiveStream::new(info, move || {
            stop.store(true, Ordering::Release);
            let _ = handle.join();
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::frame::levels;

    #[test]
    fn pluck_rings_above_noise() {
        let signal = SyntheticSignal::silence(200.0, 48_000)
            .with_noise(0.001, 1)
            .with_pluck(100.0, 0.5, 30.0);
        let feed = signal.into_feed(256);
        let before = levels(&feed.samples[0..256]).0;
        let at_pluck = levels(&feed.samples[4800..4800 + 256]).0;
        assert!(before < 0.002);
        assert!(at_pluck > 0.1);
    }

    #[test]
    fn block_count_rounds_up() {
        let feed = SyntheticFeed::new(vec![0.0; 1000], 48_000, 256);
        assert_eq!(feed.block_count(), 4);
    }

    #[test]
    fn reads_wav_first_channel() {
        let path = std::env::temp_dir().join(format!("synthetic-{}.wav", std::process::id()));
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(i16::MAX / 2).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let feed = SyntheticFeed::from_wav(&path, 4).unwrap();
        assert_eq!(feed.sample_rate, 8000);
        assert_eq!(feed.samples.len(), 10);
        assert!((feed.samples[0] - 0.5).abs() < 1e-3);
        let _ = std::fs::remove_file(path);
    }
}

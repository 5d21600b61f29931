//! Input backend abstraction.
//!
//! A backend enumerates devices and opens an input stream that feeds a
//! [`FrameSink`]. The sink is the only thing the real-time callback touches.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rtrb::PushError;

use super::buffer_pool::{CaptureChannels, DropCounter};
use super::clock::{AudioClock, ClockCursor};
use super::device::InputDevice;
use crate::error::AudioError;

mod cpal;
mod synthetic;

pub use self::cpal::CpalBackend;
pub use synthetic::{SyntheticBackend, SyntheticFeed, SyntheticSignal};

/// Parameters for opening an input stream.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamRequest {
    /// `None` selects the preferred device
    pub device: Option<usize>,
    pub sample_rate: u32,
    pub buffer_size: u32,
}

/// What the backend actually opened.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub device_name: String,
    pub sample_rate: u32,
    /// Frames per callback; the requested size when the device decides
    pub buffer_size: u32,
    pub channels: u16,
}

/// Platform input backend.
pub trait InputBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn input_devices(&self) -> Result<Vec<InputDevice>, AudioError>;

    /// Open and start a stream delivering into `sink`.
    ///
    /// On error nothing keeps running and the sink is dropped.
    fn open_input(&self, request: &StreamRequest, sink: FrameSink) -> Result<ActiveStream, AudioError>;
}

/// Handle to a running stream. Dropping it stops the stream.
pub struct ActiveStream {
    info: StreamInfo,
    stop: Option<Box<dyn FnOnce() + Send>>,
}

impl ActiveStream {
    pub fn new(info: StreamInfo, stop: impl FnOnce() + Send + 'static) -> Self {
        Self {
            info,
            stop: Some(Box::new(stop)),
        }
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            stop();
        }
    }
}

/// Latched stream error, written from backend error callbacks.
#[derive(Debug, Clone, Default)]
pub struct StreamErrorSlot(Arc<Mutex<Option<AudioError>>>);

impl StreamErrorSlot {
    /// Record a failure. The first error wins until it is taken.
    pub fn report(&self, error: AudioError) {
        if let Ok(mut slot) = self.0.lock() {
            if slot.is_none() {
                *slot = Some(error);
            }
        }
    }

    pub fn take(&self) -> Option<AudioError> {
        self.0.lock().ok().and_then(|mut slot| slot.take())
    }

    pub fn is_set(&self) -> bool {
        self.0.lock().map(|slot| slot.is_some()).unwrap_or(false)
    }
}

/// Shared input latency measurement in microseconds.
#[derive(Debug, Clone, Default)]
pub struct LatencyProbe(Arc<AtomicU64>);

impl LatencyProbe {
    pub fn record(&self, latency: Duration) {
        self.0.store(latency.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn get_ms(&self) -> f64 {
        self.0.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::Relaxed);
    }
}

/// Real-time side of the capture pipeline.
///
/// `push_interleaved` is safe to call from an audio callback: it never
/// blocks, locks, or allocates.
pub struct FrameSink {
    channels: CaptureChannels,
    clock: AudioClock,
    cursor: ClockCursor,
    drops: DropCounter,
    errors: StreamErrorSlot,
    latency: LatencyProbe,
}

impl FrameSink {
    pub(crate) fn new(
        channels: CaptureChannels,
        clock: AudioClock,
        sample_rate: u32,
        drops: DropCounter,
        errors: StreamErrorSlot,
        latency: LatencyProbe,
    ) -> Self {
        let cursor = clock.cursor(sample_rate);
        Self {
            channels,
            clock,
            cursor,
            drops,
            errors,
            latency,
        }
    }

    /// Re-anchor the clock cursor once the backend knows the real rate.
    pub fn bind_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.cursor.sample_rate() {
            self.cursor = self.clock.cursor(sample_rate);
        }
    }

    /// Hand one interleaved block to the dispatcher.
    ///
    /// Returns `false` when the block was dropped because no pooled frame
    /// was free. The clock advances either way.
    pub fn push_interleaved(&mut self, data: &[f32], channels: usize) -> bool {
        let capture_time_ms = self.cursor.position_ms();
        let frames = data.len() / channels.max(1);

        let delivered = match self.channels.pool_consumer.pop() {
            Ok(mut frame) => {
                frame.fill_from_interleaved(data, channels, capture_time_ms);
                match self.channels.data_producer.push(frame) {
                    Ok(()) => true,
                    // Unreachable with equal queue capacities; the frame is lost.
                    Err(PushError::Full(_)) => false,
                }
            }
            Err(_) => false,
        };
        if !delivered {
            self.drops.increment();
        }

        self.cursor.advance(frames);
        delivered
    }

    /// Whether a pooled frame is free right now.
    pub fn has_room(&self) -> bool {
        !self.channels.pool_consumer.is_empty()
    }

    pub fn errors(&self) -> StreamErrorSlot {
        self.errors.clone()
    }

    pub fn latency_probe(&self) -> LatencyProbe {
        self.latency.clone()
    }
}

//! Per-buffer capture frame and level metering.

/// Samples reserved per pooled frame. Covers device default buffer sizes
/// when a fixed 256-frame buffer is rejected.
pub const FRAME_CAPACITY: usize = 8192;

/// One hardware buffer of mono samples plus its levels.
///
/// Frames are pooled: the audio thread refills the same allocation every
/// time, so `samples` must never grow past its reserved capacity there.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
    pub rms: f32,
    pub peak: f32,
    /// Capture-clock time of the first sample in the buffer
    pub capture_time_ms: f64,
}

impl AudioFrame {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            samples: Vec::with_capacity(capacity),
            rms: 0.0,
            peak: 0.0,
            capture_time_ms: 0.0,
        }
    }

    /// Build a frame from mono samples, computing levels.
    pub fn from_samples(samples: Vec<f32>, capture_time_ms: f64) -> Self {
        let (rms, peak) = levels(&samples);
        Self {
            samples,
            rms,
            peak,
            capture_time_ms,
        }
    }

    /// Copy the first channel of an interleaved block into this frame.
    ///
    /// Input beyond the reserved capacity is truncated. Returns the number of
    /// mono frames in `data`.
    pub fn fill_from_interleaved(&mut self, data: &[f32], channels: usize, capture_time_ms: f64) -> usize {
        let channels = channels.max(1);
        let frames = data.len() / channels;
        let room = self.samples.capacity();

        self.samples.clear();
        if channels == 1 {
            let take = frames.min(room);
            self.samples.extend_from_slice(&data[..take]);
        } else {
            self.samples
                .extend(data.chunks_exact(channels).take(room).map(|frame| frame[0]));
        }

        let (rms, peak) = levels(&self.samples);
        self.rms = rms;
        self.peak = peak;
        self.capture_time_ms = capture_time_ms;
        frames
    }
}

/// `(rms, peak)` of a block. Both are zero for an empty block.
pub fn levels(samples: &[f32]) -> (f32, f32) {
    if samples.is_empty() {
        return (0.0, 0.0);
    }
    let mut sum_squares = 0.0f64;
    let mut peak = 0.0f32;
    for &sample in samples {
        sum_squares += (sample as f64) * (sample as f64);
        peak = peak.max(sample.abs());
    }
    ((sum_squares / samples.len() as f64).sqrt() as f32, peak)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_of_constant_signal() {
        let (rms, peak) = levels(&[0.5, -0.5, 0.5, -0.5]);
        assert!((rms - 0.5).abs() < 1e-6);
        assert_eq!(peak, 0.5);
    }

    #[test]
    fn empty_block_is_silent() {
        assert_eq!(levels(&[]), (0.0, 0.0));
    }

    #[test]
    fn deinterleaves_first_channel() {
        let mut frame = AudioFrame::with_capacity(8);
        let frames = frame.fill_from_interleaved(&[0.1, 9.0, 0.2, 9.0, 0.3, 9.0], 2, 12.5);
        assert_eq!(frames, 3);
        assert_eq!(frame.samples, vec![0.1, 0.2, 0.3]);
        assert_eq!(frame.peak, 0.3);
        assert_eq!(frame.capture_time_ms, 12.5);
    }

    #[test]
    fn fill_never_grows_past_capacity() {
        let mut frame = AudioFrame::with_capacity(4);
        let capacity = frame.samples.capacity();
        frame.fill_from_interleaved(&vec![0.25; capacity * 3], 1, 0.0);
        assert_eq!(frame.samples.len(), capacity);
        assert_eq!(frame.samples.capacity(), capacity);
    }
}

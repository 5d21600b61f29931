//! Monotonic capture clock driven by the number of samples delivered.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Shared capture clock in microseconds.
///
/// The clock only moves when audio arrives and keeps its value across
/// stream restarts, so timestamps from successive streams never go back.
#[derive(Debug, Clone, Default)]
pub struct AudioClock {
    elapsed_us: Arc<AtomicU64>,
}

impl AudioClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> f64 {
        self.elapsed_us.load(Ordering::Acquire) as f64 / 1000.0
    }

    /// Start a per-stream cursor anchored at the current clock value.
    pub fn cursor(&self, sample_rate: u32) -> ClockCursor {
        ClockCursor {
            clock: self.clone(),
            base_us: self.elapsed_us.load(Ordering::Acquire),
            frames: 0,
            sample_rate: sample_rate.max(1),
        }
    }
}

/// Advances the shared clock from one stream's frame count.
///
/// Time is derived from the total frame count so per-buffer rounding never
/// accumulates.
#[derive(Debug)]
pub struct ClockCursor {
    clock: AudioClock,
    base_us: u64,
    frames: u64,
    sample_rate: u32,
}

impl ClockCursor {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Time of the next sample to be delivered.
    pub fn position_ms(&self) -> f64 {
        self.position_us() as f64 / 1000.0
    }

    fn position_us(&self) -> u64 {
        self.base_us + self.frames * 1_000_000 / self.sample_rate as u64
    }

    /// Account for `frames` delivered samples and publish the new time.
    pub fn advance(&mut self, frames: usize) {
        self.frames += frames as u64;
        self.clock
            .elapsed_us
            .fetch_max(self.position_us(), Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advances_without_drift() {
        let clock = AudioClock::new();
        let mut cursor = clock.cursor(48_000);
        for _ in 0..1875 {
            cursor.advance(256);
        }
        assert_eq!(clock.now_ms(), 10_000.0);
    }

    #[test]
    fn new_stream_continues_from_previous_time() {
        let clock = AudioClock::new();
        let mut first = clock.cursor(48_000);
        first.advance(48_000);
        let mut second = clock.cursor(44_100);
        assert_eq!(second.position_ms(), 1000.0);
        second.advance(44_100);
        assert_eq!(clock.now_ms(), 2000.0);
    }
}

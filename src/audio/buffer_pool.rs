// FramePool - lock-free frame pool with dual SPSC queues
//
// The audio callback never allocates: it takes an empty pre-allocated frame
// from the pool queue, fills it, and pushes it onto the data queue. The
// dispatcher thread consumes filled frames and hands them back to the pool.
//
// Frame flow:
// 1. Audio thread pops an empty frame from POOL_QUEUE
// 2. Audio thread fills it (samples, rms, peak, capture time)
// 3. Audio thread pushes it to DATA_QUEUE
// 4. Dispatcher pops it from DATA_QUEUE and runs the callbacks
// 5. Dispatcher pushes it back to POOL_QUEUE
//
// When no empty frame is available the incoming block is dropped and counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use super::frame::AudioFrame;

/// Producer/consumer ends of both queues.
pub struct FramePoolChannels {
    /// Filled frames, audio thread -> dispatcher
    pub data_producer: Producer<AudioFrame>,
    pub data_consumer: Consumer<AudioFrame>,
    /// Empty frames, dispatcher -> audio thread
    pub pool_producer: Producer<AudioFrame>,
    pub pool_consumer: Consumer<AudioFrame>,
}

/// Ends owned by the audio thread.
pub struct CaptureChannels {
    pub data_producer: Producer<AudioFrame>,
    pub pool_consumer: Consumer<AudioFrame>,
}

/// Ends owned by the dispatcher thread.
pub struct DispatchChannels {
    pub data_consumer: Consumer<AudioFrame>,
    pub pool_producer: Producer<AudioFrame>,
}

impl FramePoolChannels {
    pub fn split(self) -> (CaptureChannels, DispatchChannels) {
        (
            CaptureChannels {
                data_producer: self.data_producer,
                pool_consumer: self.pool_consumer,
            },
            DispatchChannels {
                data_consumer: self.data_consumer,
                pool_producer: self.pool_producer,
            },
        )
    }
}

pub struct FramePool;

impl FramePool {
    /// Allocate `frame_count` frames of `frame_capacity` samples each.
    ///
    /// Both queues hold `frame_count` slots, so the data queue can only be
    /// full when the pool is empty. A zero count is raised to one.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(frame_count: usize, frame_capacity: usize) -> FramePoolChannels {
        let frame_count = frame_count.max(1);
        let (mut pool_producer, pool_consumer) = RingBuffer::new(frame_count);
        let (data_producer, data_consumer) = RingBuffer::new(frame_count);

        for _ in 0..frame_count {
            // Capacity equals frame_count, so this push cannot fail.
            let _ = pool_producer.push(AudioFrame::with_capacity(frame_capacity));
        }

        FramePoolChannels {
            data_producer,
            data_consumer,
            pool_producer,
            pool_consumer,
        }
    }
}

/// Shared counter of frames dropped by the audio thread.
#[derive(Debug, Clone, Default)]
pub struct DropCounter(Arc<AtomicU64>);

impl DropCounter {
    pub fn increment(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_starts_full() {
        let mut channels = FramePool::new(16, 256);

        let mut available = 0;
        while let Ok(frame) = channels.pool_consumer.pop() {
            assert!(frame.samples.capacity() >= 256);
            available += 1;
        }
        assert_eq!(available, 16);
        assert!(channels.data_consumer.pop().is_err());
    }

    #[test]
    fn test_frame_round_trip_through_queues() {
        let (mut capture, mut dispatch) = FramePool::new(2, 64).split();

        let mut frame = capture.pool_consumer.pop().unwrap();
        frame.fill_from_interleaved(&[0.5; 64], 1, 3.0);
        capture.data_producer.push(frame).unwrap();

        let received = dispatch.data_consumer.pop().unwrap();
        assert_eq!(received.capture_time_ms, 3.0);
        dispatch.pool_producer.push(received).unwrap();

        let mut recycled = 0;
        while capture.pool_consumer.pop().is_ok() {
            recycled += 1;
        }
        assert_eq!(recycled, 2);
    }

    #[test]
    fn test_zero_count_is_raised() {
        let mut channels = FramePool::new(0, 8);
        assert!(channels.pool_consumer.pop().is_ok());
    }
}

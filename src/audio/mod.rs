// Audio module - low-latency input capture

pub mod backend;
pub mod buffer_pool;
pub mod capture;
pub mod clock;
pub mod device;
pub mod frame;

// Re-export commonly used types for convenience
pub use backend::{CpalBackend, InputBackend, SyntheticBackend, SyntheticFeed, SyntheticSignal};
pub use capture::{CaptureEngine, InputCallback, DEFAULT_NOISE_FLOOR};
pub use clock::AudioClock;
pub use device::{InputDevice, LatencyInfo};
pub use frame::AudioFrame;

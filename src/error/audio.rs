// Audio capture error types and constants

use crate::error::ErrorCode;
use log::error;
use std::fmt;

/// Audio error code constants
///
/// Error code range: 1001-1008
pub struct AudioErrorCodes {}

impl AudioErrorCodes {
    /// No input-capable device is available on any host
    pub const NO_INPUT_DEVICE: i32 = 1001;

    /// Requested device index does not exist
    pub const DEVICE_NOT_FOUND: i32 = 1002;

    /// Audio engine is not running
    pub const NOT_RUNNING: i32 = 1003;

    /// Hardware error occurred
    pub const HARDWARE_ERROR: i32 = 1004;

    /// Device only offers a sample format the capture path cannot read
    pub const UNSUPPORTED_FORMAT: i32 = 1005;

    /// Failed to open audio stream
    pub const STREAM_OPEN_FAILED: i32 = 1006;

    /// Mutex/RwLock was poisoned
    pub const LOCK_POISONED: i32 = 1007;

    /// Audio stream reported an error or disconnected mid-session
    pub const STREAM_FAILURE: i32 = 1008;
}

/// Log an audio error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_audio_error(err: &AudioError, context: &str) {
    error!(
        "Audio error in {}: code={}, component=CaptureEngine, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Audio capture errors
///
/// These errors cover device enumeration, stream management, and failures
/// reported by the backend while a stream is running.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioError {
    /// No input-capable device is available
    NoInputDevice,

    /// Requested device index does not exist
    DeviceNotFound { index: usize },

    /// Audio engine is not running
    NotRunning,

    /// Hardware error occurred
    HardwareError { details: String },

    /// Device sample format is not supported
    UnsupportedFormat { format: String },

    /// Failed to open audio stream
    StreamOpenFailed { reason: String },

    /// Mutex/RwLock was poisoned
    LockPoisoned { component: String },

    /// Stream failed while running
    StreamFailure { reason: String },
}

impl ErrorCode for AudioError {
    fn code(&self) -> i32 {
        match self {
            AudioError::NoInputDevice => AudioErrorCodes::NO_INPUT_DEVICE,
            AudioError::DeviceNotFound { .. } => AudioErrorCodes::DEVICE_NOT_FOUND,
            AudioError::NotRunning => AudioErrorCodes::NOT_RUNNING,
            AudioError::HardwareError { .. } => AudioErrorCodes::HARDWARE_ERROR,
            AudioError::UnsupportedFormat { .. } => AudioErrorCodes::UNSUPPORTED_FORMAT,
            AudioError::StreamOpenFailed { .. } => AudioErrorCodes::STREAM_OPEN_FAILED,
            AudioError::LockPoisoned { .. } => AudioErrorCodes::LOCK_POISONED,
            AudioError::StreamFailure { .. } => AudioErrorCodes::STREAM_FAILURE,
        }
    }

    fn message(&self) -> String {
        match self {
            AudioError::NoInputDevice => "No audio input device available".to_string(),
            AudioError::DeviceNotFound { index } => {
                format!("Input device {} not found", index)
            }
            AudioError::NotRunning => {
                "Audio capture not running. Call start() first.".to_string()
            }
            AudioError::HardwareError { details } => {
                format!("Hardware error: {}", details)
            }
            AudioError::UnsupportedFormat { format } => {
                format!("Unsupported input sample format: {}", format)
            }
            AudioError::StreamOpenFailed { reason } => {
                format!("Failed to open audio stream: {}", reason)
            }
            AudioError::LockPoisoned { component } => {
                format!("Lock poisoned on {}", component)
            }
            AudioError::StreamFailure { reason } => {
                format!("Audio stream failed: {}", reason)
            }
        }
    }
}

impl fmt::Display for AudioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for AudioError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(AudioError::NoInputDevice.code(), 1001);
        assert_eq!(AudioError::DeviceNotFound { index: 3 }.code(), 1002);
        assert_eq!(
            AudioError::StreamFailure {
                reason: "gone".into()
            }
            .code(),
            1008
        );
    }

    #[test]
    fn display_includes_code_and_message() {
        let err = AudioError::StreamOpenFailed {
            reason: "busy".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("code 1006"));
        assert!(rendered.contains("Failed to open audio stream: busy"));
    }
}

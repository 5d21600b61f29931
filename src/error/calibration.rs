// Calibration error types and constants

use crate::error::{AudioError, ErrorCode};
use log::error;
use std::fmt;

/// Calibration error code constants
///
/// Error code range: 2001-2004
pub struct CalibrationErrorCodes {}

impl CalibrationErrorCodes {
    /// Too few click/trigger pairs to estimate latency
    pub const INSUFFICIENT_SAMPLES: i32 = 2001;

    /// Capture failed while measuring the noise floor
    pub const CAPTURE_FAILED: i32 = 2002;

    /// Calibration state RwLock was poisoned
    pub const STATE_POISONED: i32 = 2003;

    /// Calibration input contained non-finite timestamps
    pub const INVALID_INPUT: i32 = 2004;
}

/// Log a calibration error with structured context
pub fn log_calibration_error(err: &CalibrationError, context: &str) {
    error!(
        "Calibration error in {}: code={}, component=OnsetDetector, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Calibration-related errors
#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationError {
    /// Fewer valid samples than required
    InsufficientSamples { required: usize, collected: usize },

    /// Audio capture failed during measurement
    CaptureFailed(AudioError),

    /// Calibration state lock was poisoned
    StatePoisoned,

    /// Timestamps were NaN or infinite
    InvalidInput { reason: String },
}

impl ErrorCode for CalibrationError {
    fn code(&self) -> i32 {
        match self {
            CalibrationError::InsufficientSamples { .. } => {
                CalibrationErrorCodes::INSUFFICIENT_SAMPLES
            }
            CalibrationError::CaptureFailed(_) => CalibrationErrorCodes::CAPTURE_FAILED,
            CalibrationError::StatePoisoned => CalibrationErrorCodes::STATE_POISONED,
            CalibrationError::InvalidInput { .. } => CalibrationErrorCodes::INVALID_INPUT,
        }
    }

    fn message(&self) -> String {
        match self {
            CalibrationError::InsufficientSamples {
                required,
                collected,
            } => format!(
                "Insufficient samples: need {} click/trigger pairs, got {}",
                required, collected
            ),
            CalibrationError::CaptureFailed(err) => {
                format!("Capture failed during calibration: {}", err.message())
            }
            CalibrationError::StatePoisoned => "Calibration state lock poisoned".to_string(),
            CalibrationError::InvalidInput { reason } => {
                format!("Invalid calibration input: {}", reason)
            }
        }
    }
}

impl fmt::Display for CalibrationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CalibrationError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for CalibrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CalibrationError::CaptureFailed(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AudioError> for CalibrationError {
    fn from(err: AudioError) -> Self {
        CalibrationError::CaptureFailed(err)
    }
}

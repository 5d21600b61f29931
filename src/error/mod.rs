// Error types for the timing trainer
//
// Each domain (audio capture, calibration, practice sessions) has its own
// error enum with a stable numeric code so callers at any boundary (CLI, HTTP)
// can report failures consistently.

mod audio;
mod calibration;
mod session;

pub use audio::{log_audio_error, AudioError, AudioErrorCodes};
pub use calibration::{log_calibration_error, CalibrationError, CalibrationErrorCodes};
pub use session::{log_session_error, SessionError, SessionErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from the crate's error types.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}

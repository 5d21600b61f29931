// Practice session error types and constants

use crate::error::{AudioError, ErrorCode};
use log::error;
use std::fmt;

/// Session error code constants
///
/// Error code range: 3001-3004
pub struct SessionErrorCodes {}

impl SessionErrorCodes {
    /// Session id is unknown (never started, completed, or evicted)
    pub const NOT_FOUND: i32 = 3001;

    /// Lifecycle transition not allowed from the current state
    pub const INVALID_TRANSITION: i32 = 3002;

    /// Session store lock was poisoned
    pub const STATE_POISONED: i32 = 3003;

    /// Audio pipeline failed during a session
    pub const AUDIO: i32 = 3004;
}

/// Log a session error with structured context
pub fn log_session_error(err: &SessionError, context: &str) {
    error!(
        "Session error in {}: code={}, component=TimingSession, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by the practice session lifecycle and session store
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Unknown session id
    NotFound { session_id: String },

    /// Transition not allowed
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Store lock poisoned
    StatePoisoned,

    /// Capture or detection failed underneath the session
    Audio(AudioError),
}

impl ErrorCode for SessionError {
    fn code(&self) -> i32 {
        match self {
            SessionError::NotFound { .. } => SessionErrorCodes::NOT_FOUND,
            SessionError::InvalidTransition { .. } => SessionErrorCodes::INVALID_TRANSITION,
            SessionError::StatePoisoned => SessionErrorCodes::STATE_POISONED,
            SessionError::Audio(_) => SessionErrorCodes::AUDIO,
        }
    }

    fn message(&self) -> String {
        match self {
            SessionError::NotFound { .. } => "Session not found".to_string(),
            SessionError::InvalidTransition { from, to } => {
                format!("Cannot move session from {} to {}", from, to)
            }
            SessionError::StatePoisoned => "Session store lock poisoned".to_string(),
            SessionError::Audio(err) => err.message(),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SessionError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Audio(err) => Some(err),
            _ => None,
        }
    }
}

impl From<AudioError> for SessionError {
    fn from(err: AudioError) -> Self {
        SessionError::Audio(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_matches_web_contract() {
        let err = SessionError::NotFound {
            session_id: "abc".into(),
        };
        assert_eq!(err.code(), 3001);
        assert_eq!(err.message(), "Session not found");
    }

    #[test]
    fn audio_errors_keep_their_source() {
        use std::error::Error;

        let err = SessionError::from(AudioError::NotRunning);
        assert_eq!(err.code(), SessionErrorCodes::AUDIO);
        assert!(err.source().is_some());
    }
}
